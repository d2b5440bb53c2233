//! Reconciliation job repository.

use crate::error::MetadataResult;
use crate::models::GcJobRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for reconciliation job bookkeeping.
#[async_trait]
pub trait GcRepo: Send + Sync {
    /// Create a job. Fails with `Constraint` if a job of the same type is
    /// already queued or running.
    async fn create_gc_job(&self, job: &GcJobRow) -> MetadataResult<()>;

    /// Get a GC job by ID.
    async fn get_gc_job(&self, job_id: Uuid) -> MetadataResult<Option<GcJobRow>>;

    /// Update GC job state.
    async fn update_gc_job_state(
        &self,
        job_id: Uuid,
        state: &str,
        finished_at: Option<OffsetDateTime>,
        stats_json: Option<&str>,
    ) -> MetadataResult<()>;

    /// Most recently started jobs first.
    async fn get_recent_gc_jobs(&self, limit: u32) -> MetadataResult<Vec<GcJobRow>>;

    /// Queued or running jobs of one type.
    async fn get_active_gc_jobs(&self, job_type: &str) -> MetadataResult<Vec<GcJobRow>>;

    /// Jobs of any type still marked queued or running.
    ///
    /// At startup nothing is executing yet, so every such job was left behind
    /// by a previous process.
    async fn get_orphaned_gc_jobs(&self) -> MetadataResult<Vec<GcJobRow>>;
}

/// GC job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcJobType {
    /// Delete blobs whose removal was deferred by a song delete.
    BlobTombstones,
    /// Delete stored objects that no song references.
    StorageSweep,
}

impl GcJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlobTombstones => "blob_tombstones",
            Self::StorageSweep => "storage_sweep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blob_tombstones" => Some(Self::BlobTombstones),
            "storage_sweep" => Some(Self::StorageSweep),
            _ => None,
        }
    }
}

/// GC job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcJobState {
    Queued,
    Running,
    Finished,
    Failed,
}

impl GcJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

/// GC job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct GcStats {
    /// Number of items processed.
    pub items_processed: u64,
    /// Number of items deleted.
    pub items_deleted: u64,
    /// Bytes reclaimed.
    pub bytes_reclaimed: u64,
    /// Errors encountered.
    pub errors: u64,
}
