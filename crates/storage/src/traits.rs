//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// A boxed stream of object keys for streaming list operations.
pub type KeyStream = Pin<Box<dyn Stream<Item = StorageResult<String>> + Send>>;

/// Blob store for raw audio bytes.
///
/// Keys are opaque `/`-separated strings chosen by the caller. Writes are
/// atomic: a reader sees either no object or the complete object.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size and modification time without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Stream the range `[start, end)` of an object. `end` must not exceed
    /// the object size.
    async fn get_range_stream(&self, key: &str, start: u64, end: u64)
    -> StorageResult<ByteStream>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a streaming upload. Nothing is visible under `key` until
    /// [`StreamingUpload::finish`] succeeds.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Missing objects are reported as `NotFound`.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List objects with a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// List objects with a prefix, returning a stream of keys.
    /// This is more memory-efficient for large listings than list().
    async fn list_stream(&self, prefix: &str) -> StorageResult<KeyStream>;

    /// Copy an object.
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Get the name of this storage backend (e.g., "s3", "filesystem").
    /// Used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called at startup and by the health endpoint. The default
    /// implementation always succeeds.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding everything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
