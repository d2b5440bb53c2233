//! Prometheus metrics for the Cadence server.
//!
//! Exposes metrics for ingestion, delivery and reconciliation jobs.
//!
//! The `/metrics` endpoint is unauthenticated. Metrics carry no song
//! identifiers or titles, only aggregate counts, but the endpoint should
//! still be network-restricted to the Prometheus scraper.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Ingestion metrics
pub static INGESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cadence_ingests_total",
            "Total ingestion attempts by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static INGESTED_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cadence_ingested_bytes_total",
        "Total audio bytes committed by successful ingestions",
    )
    .expect("metric creation failed")
});

pub static INGEST_CANCELLED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cadence_ingest_cancelled_total",
        "Total ingestions abandoned mid-flight and cleaned up in the background",
    )
    .expect("metric creation failed")
});

pub static COMPENSATING_DELETES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cadence_compensating_deletes_total",
        "Total committed blobs deleted because their song record could not be written",
    )
    .expect("metric creation failed")
});

// Delivery metrics
pub static DELIVERIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cadence_deliveries_total",
            "Total delivery responses by disposition and status",
        ),
        &["disposition", "status"],
    )
    .expect("metric creation failed")
});

pub static DELIVERED_BYTES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cadence_delivered_bytes_total",
        "Total audio bytes promised by delivery responses",
    )
    .expect("metric creation failed")
});

// GC metrics
pub static GC_JOBS_PANICKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "cadence_gc_jobs_panicked_total",
        "Total number of GC jobs that panicked",
    )
    .expect("metric creation failed")
});

pub static GC_JOBS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "cadence_gc_jobs_active",
        "Number of currently active GC jobs (queued + running)",
    )
    .expect("metric creation failed")
});

pub static GC_JOB_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "cadence_gc_job_duration_seconds",
            "GC job duration by type and state",
        )
        .buckets(vec![0.1, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0]),
        &["job_type", "state"],
    )
    .expect("metric creation failed")
});

pub static GC_ITEMS_DELETED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cadence_gc_items_deleted_total",
            "Total items deleted by GC job type",
        ),
        &["job_type"],
    )
    .expect("metric creation failed")
});

pub static GC_BYTES_RECLAIMED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "cadence_gc_bytes_reclaimed_total",
            "Total bytes reclaimed by GC job type",
        ),
        &["job_type"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build as many routers as they like.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(INGESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INGESTED_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INGEST_CANCELLED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(COMPENSATING_DELETES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DELIVERIES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DELIVERED_BYTES.clone()))
            .expect("metric registration failed");

        // GC metrics
        REGISTRY
            .register(Box::new(GC_JOBS_PANICKED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(GC_JOBS_ACTIVE.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(GC_JOB_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(GC_ITEMS_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(GC_BYTES_RECLAIMED.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
