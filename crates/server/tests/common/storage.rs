//! Storage test utilities, including a blob store that fails on demand.

use async_trait::async_trait;
use bytes::Bytes;
use cadence_storage::{
    ByteStream, FilesystemBackend, KeyStream, ObjectMeta, ObjectStore, StorageError,
    StorageResult, StreamingUpload,
};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;

/// A filesystem blob store in a temp directory.
#[allow(dead_code)]
pub struct TestStorage {
    pub backend: Arc<dyn ObjectStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestStorage {
    pub async fn new() -> StorageResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let backend = FilesystemBackend::new(temp_dir.path()).await?;

        Ok(Self {
            backend: Arc::new(backend),
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.backend.clone()
    }
}

/// Wraps a blob store and fails selected operations while a switch is on.
#[allow(dead_code)]
pub struct FlakyStorage {
    inner: Arc<dyn ObjectStore>,
    pub fail_deletes: AtomicBool,
    /// Deletes of keys under this prefix fail regardless of `fail_deletes`.
    pub fail_delete_prefix: Mutex<Option<String>>,
    pub fail_health: AtomicBool,
}

#[allow(dead_code)]
impl FlakyStorage {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            fail_deletes: AtomicBool::new(false),
            fail_delete_prefix: Mutex::new(None),
            fail_health: AtomicBool::new(false),
        }
    }

    fn injected(op: &str) -> StorageError {
        StorageError::Io(std::io::Error::other(format!("injected {op} failure")))
    }
}

#[async_trait]
impl ObjectStore for FlakyStorage {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_range_stream(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<ByteStream> {
        self.inner.get_range_stream(key, start, end).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        self.inner.put_stream(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let prefixed = self
            .fail_delete_prefix
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|prefix| key.starts_with(prefix));
        if prefixed || self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn list_stream(&self, prefix: &str) -> StorageResult<KeyStream> {
        self.inner.list_stream(prefix).await
    }

    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        self.inner.copy(from, to).await
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn health_check(&self) -> StorageResult<()> {
        if self.fail_health.load(Ordering::SeqCst) {
            return Err(Self::injected("health check"));
        }
        self.inner.health_check().await
    }
}

/// Every key currently stored under `prefix`.
#[allow(dead_code)]
pub async fn stored_keys(storage: &dyn ObjectStore, prefix: &str) -> Vec<String> {
    let mut keys = storage.list(prefix).await.expect("Failed to list storage");
    keys.sort();
    keys
}
