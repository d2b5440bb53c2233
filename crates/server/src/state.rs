//! Application state shared across handlers.

use crate::library::Library;
use cadence_core::config::AppConfig;
use cadence_metadata::MetadataStore;
use cadence_metadata::repos::{GcJobState, GcRepo};
use cadence_storage::ObjectStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Registry for tracking background GC tasks and detecting panics.
///
/// A panicking job task never records its final state, which would leave
/// the job `running` and block further jobs of its type until restart. The
/// watchdog marks such jobs failed instead.
pub struct GcTaskRegistry {
    tasks: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
    metadata: Arc<dyn MetadataStore>,
}

impl GcTaskRegistry {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            metadata,
        }
    }

    /// Register a spawned GC task.
    pub async fn register(&self, job_id: Uuid, handle: JoinHandle<()>) {
        self.tasks.lock().await.insert(job_id, handle);
    }

    /// Number of tasks not yet reaped by the watchdog.
    pub async fn tracked(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Spawn a watchdog task that periodically checks for panicked tasks.
    /// The caller keeps the handle for the lifetime of the server.
    pub fn spawn_watchdog(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(10)).await;
                self.check_tasks().await;
            }
        })
    }

    /// Reap finished tasks, failing the jobs of any that panicked.
    pub async fn check_tasks(&self) {
        let finished: Vec<(Uuid, JoinHandle<()>)> = {
            let mut tasks = self.tasks.lock().await;
            let done: Vec<Uuid> = tasks
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(job_id, _)| *job_id)
                .collect();
            done.into_iter()
                .filter_map(|job_id| tasks.remove(&job_id).map(|h| (job_id, h)))
                .collect()
        };

        for (job_id, handle) in finished {
            match handle.await {
                Ok(()) => {
                    tracing::debug!(job_id = %job_id, "GC task completed");
                }
                Err(join_err) if join_err.is_panic() => {
                    crate::metrics::GC_JOBS_ACTIVE.dec();
                    crate::metrics::GC_JOBS_PANICKED.inc();
                    tracing::error!(
                        job_id = %job_id,
                        panic = ?join_err,
                        "GC task panicked, marking job as failed"
                    );

                    let stats = serde_json::json!({
                        "items_processed": 0,
                        "items_deleted": 0,
                        "bytes_reclaimed": 0,
                        "errors": 1,
                        "panic": true
                    })
                    .to_string();

                    if let Err(e) = self
                        .metadata
                        .update_gc_job_state(
                            job_id,
                            GcJobState::Failed.as_str(),
                            Some(time::OffsetDateTime::now_utc()),
                            Some(&stats),
                        )
                        .await
                    {
                        tracing::error!(
                            job_id = %job_id,
                            error = %e,
                            "Failed to mark panicked job as failed"
                        );
                    }
                }
                Err(join_err) => {
                    crate::metrics::GC_JOBS_ACTIVE.dec();
                    tracing::warn!(job_id = %job_id, error = ?join_err, "GC task was cancelled");
                }
            }
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Blob store.
    pub storage: Arc<dyn ObjectStore>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Ingestion, delivery, catalog and playlist operations.
    pub library: Library,
    /// GC task registry for panic detection.
    pub gc_task_registry: Arc<GcTaskRegistry>,
}

impl AppState {
    /// Assemble state from already validated configuration.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        gc_task_registry: Arc<GcTaskRegistry>,
    ) -> Self {
        let library = Library::new(storage.clone(), metadata.clone(), config.library.clone());
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            library,
            gc_task_registry,
        }
    }
}
