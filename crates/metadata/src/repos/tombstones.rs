//! Blob tombstones left by two-sided deletes.

use crate::error::MetadataResult;
use crate::models::BlobTombstoneRow;
use async_trait::async_trait;

/// Repository for blob tombstones.
#[async_trait]
pub trait TombstoneRepo: Send + Sync {
    /// Record a blob for deletion. Recording the same key twice is a no-op.
    async fn create_blob_tombstone(&self, tombstone: &BlobTombstoneRow) -> MetadataResult<()>;

    /// Oldest tombstones first.
    async fn get_pending_blob_tombstones(&self, limit: u32)
    -> MetadataResult<Vec<BlobTombstoneRow>>;

    /// Forget a tombstone once its blob is gone.
    async fn delete_blob_tombstone(&self, blob_key: &str) -> MetadataResult<()>;
}
