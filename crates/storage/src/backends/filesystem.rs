//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, KeyStream, ObjectMeta, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Get the full path for a key, with path traversal protection.
    ///
    /// This is an async wrapper around `key_path_sync` that uses `spawn_blocking`
    /// to avoid blocking the Tokio runtime during filesystem operations like
    /// `canonicalize` and `symlink_metadata`.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Synchronous key path validation with path traversal protection.
    ///
    /// Returns an error if the key would escape the storage root.
    /// This includes protection against symlink-based traversal attacks.
    fn key_path_sync(root: &Path, key: &str) -> StorageResult<PathBuf> {
        // Reject keys with obvious path traversal attempts (fast path)
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        // Validate all path components are normal (no .., ., root, etc.)
        for component in std::path::Path::new(key).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    )));
                }
            }
        }

        let path = root.join(key);

        let root_canonical = root.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize root: {e}"),
            ))
        })?;

        // For existing paths (or symlinks, even if broken), canonicalize and verify
        // they don't escape the root. This catches symlink-based traversal attacks
        // where a symlink inside the storage root points to a location outside of it.
        match std::fs::symlink_metadata(&path) {
            Ok(meta) => {
                let canonical = path.canonicalize().map_err(|e| {
                    if meta.file_type().is_symlink() {
                        StorageError::InvalidKey(format!(
                            "symlink target missing or invalid: {key}"
                        ))
                    } else {
                        StorageError::Io(std::io::Error::new(
                            e.kind(),
                            format!("failed to canonicalize path: {e}"),
                        ))
                    }
                })?;

                if !canonical.starts_with(&root_canonical) {
                    return Err(StorageError::InvalidKey(format!(
                        "resolved path escapes storage root: {key}"
                    )));
                }

                // Return the original path (not canonical) to preserve consistency
                // with root in list operations. The security check above ensures
                // the path is safe.
                return Ok(path);
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(StorageError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }

        // For new paths, find the nearest existing ancestor and verify it's within the root.
        // This prevents creating files through symlinked directories, even when intermediate
        // directories don't exist yet. For example: if root/a -> /tmp/out (symlink), and
        // key is "a/b/file", the parent "root/a/b" doesn't exist, but ancestor "root/a"
        // does and would escape the root via symlink.

        // Walk up the path to find the nearest existing ancestor
        let mut ancestor = path.as_path();
        while let Some(parent) = ancestor.parent() {
            match std::fs::symlink_metadata(parent) {
                Ok(meta) => {
                    let parent_canonical = parent.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "ancestor symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize ancestor: {e}"),
                            ))
                        }
                    })?;

                    if !parent_canonical.starts_with(&root_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "ancestor path escapes storage root: {key}"
                        )));
                    }
                    // Found a valid existing ancestor within root
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat ancestor: {err}"),
                    )));
                }
            }
            ancestor = parent;
        }

        Ok(path)
    }

    /// Open an object for reading, mapping a missing file to `NotFound`.
    async fn open_object(path: &Path, key: &str) -> StorageResult<fs::File> {
        fs::File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }

    /// Unique sibling path used while a write is in flight.
    fn temp_path_for(path: &Path) -> PathBuf {
        let temp_name = format!(".tmp.{}", Uuid::new_v4());
        path.with_file_name(
            path.file_name()
                .map(|n| format!("{}{}", n.to_string_lossy(), temp_name))
                .unwrap_or_else(|| temp_name.clone()),
        )
    }

    /// In-flight writes are never listed.
    fn is_temp_file(path: &Path) -> bool {
        path.file_name()
            .is_some_and(|n| n.to_string_lossy().contains(".tmp."))
    }

    /// Ensure parent directory exists.
    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
            content_type: None,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_range_stream(
        &self,
        key: &str,
        start: u64,
        end: u64,
    ) -> StorageResult<ByteStream> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        if end < start {
            return Err(StorageError::InvalidRange(format!(
                "end ({}) < start ({})",
                end, start
            )));
        }

        let path = self.key_path(key).await?;
        let mut file = Self::open_object(&path, key).await?;
        let size = file.metadata().await?.len();
        if end > size {
            return Err(StorageError::InvalidRange(format!(
                "range end {end} exceeds object size {size}"
            )));
        }
        file.seek(std::io::SeekFrom::Start(start)).await?;

        let stream = async_stream::try_stream! {
            let mut reader = file.take(end - start);
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        let temp_path = Self::temp_path_for(&path);
        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        let temp_path = Self::temp_path_for(&path);
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemUpload {
            file: Some(file),
            temp_path,
            final_path: path,
            bytes_written: 0,
            settled: false,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        use futures::TryStreamExt;

        self.list_stream(prefix).await?.try_collect().await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_stream(&self, prefix: &str) -> StorageResult<KeyStream> {
        let base_path = self.key_path(prefix).await?;
        let root = self.root.clone();

        let base_path_exists = match fs::try_exists(&base_path).await {
            Ok(exists) => exists,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(StorageError::Io(e)),
        };

        let stream = async_stream::try_stream! {
            if !base_path_exists {
                return;
            }

            let mut stack = vec![base_path];
            while let Some(dir) = stack.pop() {
                let mut entries = fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let path = entry.path();
                    // file_type() does not follow symlinks; links are never listed.
                    let file_type = entry.file_type().await?;
                    if file_type.is_dir() {
                        stack.push(path);
                    } else if file_type.is_file()
                        && !Self::is_temp_file(&path)
                        && let Ok(rel) = path.strip_prefix(&root) {
                            yield rel.to_string_lossy().to_string();
                        }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        let from_path = self.key_path(from).await?;
        let to_path = self.key_path(to).await?;
        self.ensure_parent(&to_path).await?;

        let temp_path = Self::temp_path_for(&to_path);
        if let Err(e) = fs::copy(&from_path, &temp_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(from.to_string())
            } else {
                StorageError::Io(e)
            });
        }
        if let Err(e) = fs::rename(&temp_path, &to_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {}", e),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

/// Streaming upload for filesystem backend.
///
/// Bytes land in a sibling temp file that is renamed into place on
/// `finish`. If the upload is dropped without `finish` or `abort` (for
/// example because the request future was cancelled) the temp file is
/// removed on drop.
struct FilesystemUpload {
    file: Option<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
    settled: bool,
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(StorageError::Io(std::io::Error::other(
                "upload already closed",
            )));
        };
        file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        if let Some(file) = self.file.take() {
            file.sync_all().await?;
        }
        fs::rename(&self.temp_path, &self.final_path).await?;
        self.settled = true;
        Ok(self.bytes_written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        self.file.take();
        self.settled = true;
        match fs::remove_file(&self.temp_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

impl Drop for FilesystemUpload {
    fn drop(&mut self) {
        if !self.settled {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let key = "test/object";
        let data = Bytes::from("hello world");

        backend.put(key, data.clone()).await.unwrap();
        assert!(backend.exists(key).await.unwrap());

        let retrieved = backend.get(key).await.unwrap();
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_range_stream_reads_exact_window() {
        use futures::TryStreamExt;

        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        backend
            .put("audio/ab/cd/song", Bytes::from(data.clone()))
            .await
            .unwrap();

        let chunks: Vec<Bytes> = backend
            .get_range_stream("audio/ab/cd/song", 70_000, 150_001)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let body: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(body, &data[70_000..150_001]);
        assert!(chunks.iter().all(|c| c.len() <= STREAM_CHUNK_SIZE));
    }

    #[tokio::test]
    async fn test_range_stream_rejects_end_past_object() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        backend.put("k", Bytes::from_static(b"0123456789")).await.unwrap();

        assert!(matches!(
            backend.get_range_stream("k", 0, 11).await,
            Err(StorageError::InvalidRange(_))
        ));
        assert!(matches!(
            backend.get_range_stream("missing", 0, 1).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_streaming_upload_visible_only_after_finish() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let mut upload = backend.put_stream("staging/one").await.unwrap();
        upload.write(Bytes::from_static(b"abc")).await.unwrap();
        upload.write(Bytes::from_static(b"def")).await.unwrap();
        assert!(!backend.exists("staging/one").await.unwrap());

        assert_eq!(upload.finish().await.unwrap(), 6);
        assert_eq!(backend.get("staging/one").await.unwrap(), Bytes::from("abcdef"));
        assert_eq!(backend.list("staging").await.unwrap(), vec!["staging/one"]);
    }

    #[tokio::test]
    async fn test_streaming_upload_abort_and_drop_leave_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        let mut aborted = backend.put_stream("staging/aborted").await.unwrap();
        aborted.write(Bytes::from_static(b"partial")).await.unwrap();
        aborted.abort().await.unwrap();

        let mut dropped = backend.put_stream("staging/dropped").await.unwrap();
        dropped.write(Bytes::from_static(b"partial")).await.unwrap();
        drop(dropped);

        assert!(backend.list("staging").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();
        backend.put("staging/x", Bytes::from_static(b"payload")).await.unwrap();

        backend.copy("staging/x", "audio/aa/bb/x").await.unwrap();
        backend.delete("staging/x").await.unwrap();

        assert_eq!(backend.get("audio/aa/bb/x").await.unwrap(), Bytes::from("payload"));
        assert!(matches!(
            backend.delete("staging/x").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            backend.copy("staging/x", "audio/other").await,
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(backend.list("audio").await.unwrap(), vec!["audio/aa/bb/x"]);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        // Test various path traversal attempts
        assert!(backend.exists("../escape").await.is_err());
        assert!(backend.exists("/absolute/path").await.is_err());
        assert!(backend.exists("foo/../bar").await.is_err());
        assert!(backend.exists("foo/../../etc/passwd").await.is_err());

        // Valid keys should work
        assert!(backend.exists("valid/nested/key").await.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();

        // Create a file outside the storage root
        let outside_file = outside_dir.path().join("secret.txt");
        std::fs::write(&outside_file, "secret data").unwrap();

        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        // Create a symlink inside storage root pointing outside
        let symlink_path = dir.path().join("malicious_link");
        symlink(&outside_file, &symlink_path).unwrap();

        // Attempting to read through the symlink should fail
        let result = backend.get("malicious_link").await;
        assert!(result.is_err(), "symlink traversal should be rejected");

        // Verify the error is about escaping storage root
        if let Err(StorageError::InvalidKey(msg)) = result {
            assert!(
                msg.contains("escapes storage root"),
                "error should mention escaping root: {msg}"
            );
        } else {
            panic!("expected InvalidKey error, got: {result:?}");
        }

        // Also test symlinked directory traversal
        let symlink_dir = dir.path().join("link_to_outside");
        symlink(outside_dir.path(), &symlink_dir).unwrap();

        // Attempting to access a file through the symlinked directory should fail
        let result = backend.get("link_to_outside/secret.txt").await;
        assert!(
            result.is_err(),
            "directory symlink traversal should be rejected"
        );
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_ancestor_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();

        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        // Create a symlink inside storage root pointing to outside directory
        // This simulates: root/escape -> /tmp/outside
        let symlink_path = dir.path().join("escape");
        symlink(outside_dir.path(), &symlink_path).unwrap();

        // Try to write to a nested path where intermediate dirs don't exist
        // Key: "escape/nested/deep/file.txt"
        // - root/escape exists (symlink to outside)
        // - root/escape/nested doesn't exist
        // - root/escape/nested/deep doesn't exist
        // Without proper ancestor checking, create_dir_all would follow the symlink
        // and create directories outside the storage root.
        let result = backend
            .put("escape/nested/deep/file.txt", bytes::Bytes::from("data"))
            .await;

        assert!(
            result.is_err(),
            "ancestor symlink traversal should be rejected on write"
        );

        // Verify the error mentions escaping storage root
        if let Err(StorageError::InvalidKey(msg)) = result {
            assert!(
                msg.contains("escapes storage root"),
                "error should mention escaping root: {msg}"
            );
        } else {
            panic!("expected InvalidKey error, got: {result:?}");
        }

        // Verify nothing was created outside the storage root
        assert!(
            !outside_dir.path().join("nested").exists(),
            "should not have created directories outside storage root"
        );
    }
}
