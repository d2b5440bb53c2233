//! Cadence server binary.

use anyhow::{Context, Result};
use cadence_core::config::AppConfig;
use cadence_server::reconcile::{recover_orphaned_gc_jobs, spawn_auto_scheduler};
use cadence_server::state::GcTaskRegistry;
use cadence_server::{AppState, create_router};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cadenced")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CADENCE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Merge the optional config file with `CADENCE_` environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("CADENCE_") && key != "CADENCE_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: cadenced --config /path/to/config.toml\n  \
             2. Environment variables: CADENCE_STORAGE__TYPE=filesystem \
             CADENCE_STORAGE__PATH=/var/lib/cadence/blobs cadenced\n\n\
             See config/server.example.toml for example configuration."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("CADENCE_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Cadence v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    if config.gc.dry_run {
        tracing::warn!("GC dry-run mode enabled, reconciliation will not delete anything");
    }

    cadence_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = cadence_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Blob store initialized");

    let metadata = cadence_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    // Nothing is running yet, so any active job belongs to a dead process.
    let recovered = recover_orphaned_gc_jobs(metadata.as_ref())
        .await
        .context("failed to recover orphaned GC jobs")?;
    if recovered > 0 {
        tracing::info!(recovered, "Orphaned GC jobs recovered");
    }

    let gc_task_registry = Arc::new(GcTaskRegistry::new(metadata.clone()));
    let _watchdog_handle = gc_task_registry.clone().spawn_watchdog();
    tracing::info!("GC task watchdog spawned");

    let state = AppState::new(config.clone(), storage, metadata, gc_task_registry);

    if config.gc.auto_schedule_enabled {
        let _scheduler_handle = spawn_auto_scheduler(state.clone());
    } else {
        tracing::info!("Automatic GC scheduling disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
