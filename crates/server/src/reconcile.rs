//! Background reconciliation between the blob store and the metadata store.
//!
//! Two job types exist:
//! - `blob_tombstones` finishes deletes whose blob removal was deferred.
//! - `storage_sweep` removes stored objects no song references, such as
//!   staging leftovers and blobs orphaned by a crash mid-ingestion.
//!
//! Jobs are recorded in the metadata store; at most one job per type is
//! active at a time.

use crate::metrics;
use crate::state::AppState;
use cadence_core::config::GcConfig;
use cadence_core::layout;
use cadence_metadata::models::GcJobRow;
use cadence_metadata::repos::{GcJobState, GcJobType, GcRepo, GcStats, SongRepo, TombstoneRepo};
use cadence_metadata::{MetadataError, MetadataResult, MetadataStore};
use cadence_storage::{ObjectStore, StorageError};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// What happened to one swept object.
#[derive(Debug, PartialEq, Eq)]
enum SweepResult {
    /// A song references it.
    Kept,
    /// Deleted, reclaiming this many bytes.
    Deleted(u64),
    /// Too young, already gone, or dry run.
    Skipped,
    Error,
}

/// Create a job record and run it on a background task registered with the
/// watchdog.
///
/// Returns `MetadataError::Constraint` when a job of the same type is
/// already queued or running.
pub async fn spawn_gc_job(state: &AppState, job_type: GcJobType) -> MetadataResult<Uuid> {
    let job_id = Uuid::new_v4();
    let job = GcJobRow {
        gc_job_id: job_id,
        job_type: job_type.as_str().to_string(),
        state: GcJobState::Queued.as_str().to_string(),
        started_at: Some(OffsetDateTime::now_utc()),
        finished_at: None,
        stats_json: None,
    };
    state.metadata.create_gc_job(&job).await?;

    metrics::GC_JOBS_ACTIVE.inc();
    tracing::info!(job_id = %job_id, job_type = job_type.as_str(), "GC job queued");

    let metadata = state.metadata.clone();
    let storage = state.storage.clone();
    let gc_config = state.config.gc.clone();
    let start_time = std::time::Instant::now();

    let handle = tokio::spawn(async move {
        let result = run_gc_job(job_id, job_type, metadata.clone(), storage, gc_config).await;

        let (job_state, stats) = match result {
            Ok(stats) if stats.errors > 0 => {
                tracing::warn!(
                    job_id = %job_id,
                    errors = stats.errors,
                    "GC job completed with errors, marking as failed"
                );
                (GcJobState::Failed, Some(stats))
            }
            Ok(stats) => (GcJobState::Finished, Some(stats)),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "GC job failed");
                (GcJobState::Failed, None)
            }
        };

        metrics::GC_JOB_DURATION
            .with_label_values(&[job_type.as_str(), job_state.as_str()])
            .observe(start_time.elapsed().as_secs_f64());
        if let Some(s) = &stats {
            metrics::GC_ITEMS_DELETED
                .with_label_values(&[job_type.as_str()])
                .inc_by(s.items_deleted);
            metrics::GC_BYTES_RECLAIMED
                .with_label_values(&[job_type.as_str()])
                .inc_by(s.bytes_reclaimed);
        }
        metrics::GC_JOBS_ACTIVE.dec();

        let stats_json = stats.and_then(|s| serde_json::to_string(&s).ok());
        if let Err(e) = metadata
            .update_gc_job_state(
                job_id,
                job_state.as_str(),
                Some(OffsetDateTime::now_utc()),
                stats_json.as_deref(),
            )
            .await
        {
            tracing::error!(job_id = %job_id, error = %e, "Failed to update GC job state");
        }
    });

    state.gc_task_registry.register(job_id, handle).await;
    Ok(job_id)
}

/// Run one job to completion and return its statistics.
pub async fn run_gc_job(
    job_id: Uuid,
    job_type: GcJobType,
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    config: GcConfig,
) -> MetadataResult<GcStats> {
    metadata
        .update_gc_job_state(job_id, GcJobState::Running.as_str(), None, None)
        .await?;

    match job_type {
        GcJobType::BlobTombstones => {
            process_tombstones(job_id, metadata.as_ref(), storage.as_ref(), &config).await
        }
        GcJobType::StorageSweep => {
            sweep_storage(job_id, metadata.as_ref(), storage.as_ref(), &config).await
        }
    }
}

async fn process_tombstones(
    job_id: Uuid,
    metadata: &dyn MetadataStore,
    storage: &dyn ObjectStore,
    config: &GcConfig,
) -> MetadataResult<GcStats> {
    let mut stats = GcStats::default();
    // Keys that failed this run; seeing only these again means no progress.
    let mut failed: HashSet<String> = HashSet::new();
    let mut iterations: u64 = 0;

    loop {
        iterations += 1;
        if iterations > config.max_gc_iterations {
            tracing::warn!(
                job_id = %job_id,
                max_iterations = config.max_gc_iterations,
                "Tombstone job exceeded max iterations, stopping"
            );
            break;
        }

        // Failed keys stay pending and sort first, so read past them.
        let skipped = u32::try_from(failed.len()).unwrap_or(u32::MAX);
        let batch = metadata
            .get_pending_blob_tombstones(config.batch_size.saturating_add(skipped))
            .await?;
        if batch.iter().all(|t| failed.contains(&t.blob_key)) {
            break;
        }

        for tombstone in batch {
            if failed.contains(&tombstone.blob_key) {
                continue;
            }
            stats.items_processed += 1;

            if metadata.blob_key_referenced(&tombstone.blob_key).await? {
                tracing::warn!(
                    job_id = %job_id,
                    blob_key = %tombstone.blob_key,
                    "Tombstoned blob is referenced by a song, dropping tombstone"
                );
                metadata.delete_blob_tombstone(&tombstone.blob_key).await?;
                continue;
            }

            if config.dry_run {
                tracing::info!(
                    job_id = %job_id,
                    blob_key = %tombstone.blob_key,
                    song_id = %tombstone.song_id,
                    "DRY-RUN: Would delete tombstoned blob"
                );
                failed.insert(tombstone.blob_key);
                continue;
            }

            let size = match storage.head(&tombstone.blob_key).await {
                Ok(meta) => meta.size,
                Err(_) => 0,
            };
            match storage.delete(&tombstone.blob_key).await {
                Ok(()) => {
                    stats.items_deleted += 1;
                    stats.bytes_reclaimed += size;
                }
                Err(StorageError::NotFound(_)) => {
                    tracing::debug!(job_id = %job_id, blob_key = %tombstone.blob_key, "Tombstoned blob already gone");
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        blob_key = %tombstone.blob_key,
                        error = %e,
                        "Failed to delete tombstoned blob"
                    );
                    stats.errors += 1;
                    failed.insert(tombstone.blob_key);
                    continue;
                }
            }

            metadata.delete_blob_tombstone(&tombstone.blob_key).await?;
        }
    }

    tracing::info!(
        job_id = %job_id,
        processed = stats.items_processed,
        deleted = stats.items_deleted,
        errors = stats.errors,
        "Tombstone job finished"
    );
    Ok(stats)
}

async fn sweep_storage(
    job_id: Uuid,
    metadata: &dyn MetadataStore,
    storage: &dyn ObjectStore,
    config: &GcConfig,
) -> MetadataResult<GcStats> {
    let mut stats = GcStats::default();
    let grace_period = config.grace_period();
    let mut examined: u64 = 0;

    'prefixes: for prefix in [layout::STAGING_PREFIX, layout::AUDIO_PREFIX] {
        let mut keys = match storage.list_stream(prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(job_id = %job_id, prefix, error = %e, "Failed to list storage");
                stats.errors += 1;
                continue;
            }
        };

        while let Some(key) = keys.next().await {
            examined += 1;
            if examined > config.max_gc_iterations {
                tracing::warn!(
                    job_id = %job_id,
                    max_iterations = config.max_gc_iterations,
                    "Storage sweep exceeded max iterations, stopping"
                );
                break 'prefixes;
            }

            let key = match key {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to read storage listing");
                    stats.errors += 1;
                    break;
                }
            };
            stats.items_processed += 1;

            match sweep_object(job_id, &key, metadata, storage, config, grace_period).await {
                SweepResult::Deleted(size) => {
                    stats.items_deleted += 1;
                    stats.bytes_reclaimed += size;
                }
                SweepResult::Error => stats.errors += 1,
                SweepResult::Kept | SweepResult::Skipped => {}
            }
        }
    }

    tracing::info!(
        job_id = %job_id,
        processed = stats.items_processed,
        deleted = stats.items_deleted,
        bytes = stats.bytes_reclaimed,
        errors = stats.errors,
        "Storage sweep finished"
    );
    Ok(stats)
}

async fn sweep_object(
    job_id: Uuid,
    key: &str,
    metadata: &dyn MetadataStore,
    storage: &dyn ObjectStore,
    config: &GcConfig,
    grace_period: time::Duration,
) -> SweepResult {
    if !layout::is_managed_key(key) {
        return SweepResult::Skipped;
    }

    if key.starts_with(layout::AUDIO_PREFIX) {
        match metadata.blob_key_referenced(key).await {
            Ok(true) => return SweepResult::Kept,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(job_id = %job_id, key, error = %e, "Failed to check blob reference, skipping");
                return SweepResult::Error;
            }
        }
    }

    let (age, size) = match storage.head(key).await {
        Ok(meta) => {
            let age = match meta.last_modified {
                Some(last_modified) => OffsetDateTime::now_utc() - last_modified,
                None => {
                    // Without a timestamp only clearly ancient objects qualify.
                    tracing::warn!(
                        job_id = %job_id,
                        key,
                        "Storage backend returned no last_modified timestamp, using 7x grace period"
                    );
                    grace_period * 7
                }
            };
            (age, meta.size)
        }
        Err(StorageError::NotFound(_)) => return SweepResult::Skipped,
        Err(e) => {
            tracing::warn!(job_id = %job_id, key, error = %e, "Failed to get object age, skipping");
            return SweepResult::Error;
        }
    };

    if age < grace_period {
        tracing::trace!(job_id = %job_id, key, age_secs = age.whole_seconds(), "Within grace period, keeping");
        return SweepResult::Skipped;
    }

    if config.dry_run {
        tracing::info!(
            job_id = %job_id,
            key,
            age_secs = age.whole_seconds(),
            "DRY-RUN: Would delete unreferenced object"
        );
        return SweepResult::Skipped;
    }

    tracing::info!(job_id = %job_id, key, age_secs = age.whole_seconds(), "Deleting unreferenced object");
    match storage.delete(key).await {
        Ok(()) => SweepResult::Deleted(size),
        Err(StorageError::NotFound(_)) => SweepResult::Skipped,
        Err(e) => {
            tracing::warn!(job_id = %job_id, key, error = %e, "Failed to delete unreferenced object");
            SweepResult::Error
        }
    }
}

/// Mark jobs left queued or running by a previous process as failed.
///
/// Must run before any job is spawned. Returns the number of jobs recovered.
pub async fn recover_orphaned_gc_jobs(metadata: &dyn MetadataStore) -> MetadataResult<usize> {
    let orphaned = metadata.get_orphaned_gc_jobs().await?;
    if orphaned.is_empty() {
        return Ok(0);
    }

    tracing::warn!(
        count = orphaned.len(),
        "Found GC jobs from a previous server instance, marking as failed"
    );

    let stats = GcStats {
        errors: 1,
        ..Default::default()
    };
    let stats_json =
        serde_json::to_string(&stats).map_err(|e| MetadataError::Internal(e.to_string()))?;

    for job in &orphaned {
        metadata
            .update_gc_job_state(
                job.gc_job_id,
                GcJobState::Failed.as_str(),
                Some(OffsetDateTime::now_utc()),
                Some(&stats_json),
            )
            .await?;
        tracing::warn!(
            job_id = %job.gc_job_id,
            job_type = %job.job_type,
            job_state = %job.state,
            "Marked orphaned GC job as failed"
        );
    }
    Ok(orphaned.len())
}

/// Periodically queue the configured job types. Types that already have an
/// active job are skipped for that round.
pub fn spawn_auto_scheduler(state: AppState) -> JoinHandle<()> {
    let interval = state.config.gc.auto_schedule_interval();
    let job_types: Vec<GcJobType> = state
        .config
        .gc
        .auto_schedule_jobs
        .iter()
        .filter_map(|name| {
            let parsed = GcJobType::parse(name);
            if parsed.is_none() {
                tracing::warn!(job_type = %name, "Unknown GC job type in auto_schedule_jobs, skipping");
            }
            parsed
        })
        .collect();

    tokio::spawn(async move {
        tracing::info!(
            interval_secs = interval.as_secs(),
            job_types = ?job_types,
            "Automatic GC scheduler enabled"
        );

        loop {
            tokio::time::sleep(interval).await;

            for job_type in &job_types {
                match spawn_gc_job(&state, *job_type).await {
                    Ok(job_id) => {
                        tracing::info!(job_id = %job_id, job_type = job_type.as_str(), "Automatic GC job created");
                    }
                    Err(MetadataError::Constraint(_)) => {
                        tracing::debug!(
                            job_type = job_type.as_str(),
                            "Another GC job of this type is already active, skipping"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            job_type = job_type.as_str(),
                            error = %e,
                            "Failed to spawn automatic GC job"
                        );
                    }
                }
            }
        }
    })
}
