//! Upload ingestion.
//!
//! Bytes are streamed into a staging key while being hashed, then copied to
//! a committed key derived from the hash and the commit time. The song
//! record is written last. Any failure after bytes reach the store deletes
//! them again before the error is returned; if the ingestion future is
//! dropped instead, [`CleanupGuard`] performs the same deletions in the
//! background.

use super::error::{LibraryError, LibraryResult};
use super::{Library, Song};
use crate::metrics;
use bytes::Bytes;
use cadence_core::{ContentHash, MediaType, SongId, layout};
use cadence_metadata::models::{BlobTombstoneRow, SongRow};
use cadence_metadata::repos::{SongRepo, TombstoneRepo};
use cadence_storage::{ObjectStore, StorageError, StreamingUpload};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::instrument;
use uuid::Uuid;

pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_ARTIST: &str = "Unknown Artist";

/// Everything declared about an upload before its bytes arrive.
#[derive(Clone, Debug, Default)]
pub struct IngestRequest {
    pub content_type: String,
    pub declared_size: u64,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_ms: Option<u64>,
    pub artwork: Option<String>,
}

impl IngestRequest {
    pub fn new(content_type: impl Into<String>, declared_size: u64) -> Self {
        Self {
            content_type: content_type.into(),
            declared_size,
            ..Default::default()
        }
    }
}

/// Deletes the keys it tracks when dropped while armed.
///
/// Dropping happens on every early return and when the owning future is
/// cancelled. Deletion runs on a spawned task since `Drop` cannot await.
struct CleanupGuard {
    storage: Arc<dyn ObjectStore>,
    keys: Vec<String>,
}

impl CleanupGuard {
    fn new(storage: Arc<dyn ObjectStore>) -> Self {
        Self {
            storage,
            keys: Vec::new(),
        }
    }

    fn track(&mut self, key: &str) {
        self.keys.push(key.to_string());
    }

    fn forget(&mut self, key: &str) {
        self.keys.retain(|k| k != key);
    }

    /// Stop tracking everything; the ingestion either succeeded or already
    /// cleaned up after itself.
    fn disarm(&mut self) {
        self.keys.clear();
    }

    /// Delete every tracked key now, then disarm.
    async fn cleanup(&mut self) {
        for key in std::mem::take(&mut self.keys) {
            match self.storage.delete(&key).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(blob_key = %key, error = %e, "Failed to remove partial blob");
                }
            }
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        let keys = std::mem::take(&mut self.keys);
        let storage = self.storage.clone();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(keys = ?keys, "No runtime to clean up abandoned ingestion");
            return;
        };

        tracing::info!(keys = ?keys, "Ingestion abandoned, removing partial blobs");
        metrics::INGEST_CANCELLED.inc();
        handle.spawn(async move {
            for key in keys {
                match storage.delete(&key).await {
                    Ok(()) | Err(StorageError::NotFound(_)) => {}
                    Err(e) => {
                        tracing::warn!(blob_key = %key, error = %e, "Failed to remove abandoned blob");
                    }
                }
            }
        });
    }
}

async fn abort_upload(upload: Box<dyn StreamingUpload>, staging_key: &str) {
    if let Err(e) = upload.abort().await {
        tracing::warn!(blob_key = %staging_key, error = %e, "Failed to abort staging upload");
    }
}

impl Library {
    /// Validate the declared content type and size without touching any store.
    fn check_declared(&self, request: &IngestRequest) -> LibraryResult<MediaType> {
        let media = MediaType::parse(&request.content_type)
            .map_err(|_| LibraryError::InvalidFormat(request.content_type.clone()))?;
        if !media.is_allowed(&self.config.allowed_content_types) {
            return Err(LibraryError::InvalidFormat(media.to_string()));
        }

        if request.declared_size == 0 {
            return Err(LibraryError::InvalidInput(
                "declared size must be greater than 0".to_string(),
            ));
        }
        if request.declared_size > self.config.max_upload_bytes {
            return Err(LibraryError::TooLarge {
                declared: request.declared_size,
                max: self.config.max_upload_bytes,
            });
        }

        Ok(media)
    }

    /// Ingest an upload and return the created song.
    ///
    /// On error no blob or record attributable to this call remains, except
    /// when the compensating delete itself fails; that blob is tombstoned for
    /// reconciliation.
    #[instrument(skip(self, stream, request), fields(content_type = %request.content_type, size = request.declared_size))]
    pub async fn ingest<S, E>(&self, stream: S, request: IngestRequest) -> LibraryResult<Song>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let result = self.ingest_inner(stream, &request).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => error_label(e),
        };
        metrics::INGESTS.with_label_values(&[outcome]).inc();
        result
    }

    async fn ingest_inner<S, E>(&self, stream: S, request: &IngestRequest) -> LibraryResult<Song>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let media = self.check_declared(request)?;

        let mut guard = CleanupGuard::new(self.storage.clone());
        match self.store_and_record(stream, request, media, &mut guard).await {
            Ok(song) => {
                guard.disarm();
                Ok(song)
            }
            Err(e) => {
                guard.cleanup().await;
                Err(e)
            }
        }
    }

    async fn store_and_record<S, E>(
        &self,
        stream: S,
        request: &IngestRequest,
        media: MediaType,
        guard: &mut CleanupGuard,
    ) -> LibraryResult<Song>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Display + Send,
    {
        let declared = request.declared_size;
        let staging_key = layout::staging_key(Uuid::new_v4());
        guard.track(&staging_key);

        let mut upload = self
            .storage
            .put_stream(&staging_key)
            .await
            .map_err(|e| LibraryError::StorageWriteFailed(e.to_string()))?;

        let mut hasher = ContentHash::hasher();
        let mut received: u64 = 0;
        let mut stream = std::pin::pin!(stream);

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(received, expected = declared, error = %e, "Upload stream failed");
                    abort_upload(upload, &staging_key).await;
                    return Err(LibraryError::IncompleteStream {
                        expected: declared,
                        received,
                    });
                }
            };

            received += chunk.len() as u64;
            if received > declared {
                abort_upload(upload, &staging_key).await;
                return Err(LibraryError::InvalidInput(format!(
                    "upload exceeds its declared size of {declared} bytes"
                )));
            }

            hasher.update(&chunk);
            if let Err(e) = upload.write(chunk).await {
                abort_upload(upload, &staging_key).await;
                return Err(LibraryError::StorageWriteFailed(e.to_string()));
            }
        }

        if received < declared {
            abort_upload(upload, &staging_key).await;
            return Err(LibraryError::IncompleteStream {
                expected: declared,
                received,
            });
        }

        upload
            .finish()
            .await
            .map_err(|e| LibraryError::StorageWriteFailed(e.to_string()))?;

        let hash = hasher.finalize();
        let now = OffsetDateTime::now_utc();
        let blob_key = layout::audio_key(&hash, now);

        guard.track(&blob_key);
        self.storage
            .copy(&staging_key, &blob_key)
            .await
            .map_err(|e| LibraryError::StorageWriteFailed(e.to_string()))?;

        // A staging leftover is not attributable to any song; the storage
        // sweep reclaims it.
        match self.storage.delete(&staging_key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(blob_key = %staging_key, error = %e, "Failed to remove staging blob");
            }
        }
        guard.forget(&staging_key);

        let song_id = SongId::new();
        let row = SongRow {
            song_id: *song_id.as_uuid(),
            title: non_blank(request.title.as_deref()).unwrap_or(DEFAULT_TITLE).to_string(),
            artist: non_blank(request.artist.as_deref())
                .unwrap_or(DEFAULT_ARTIST)
                .to_string(),
            duration_ms: request.duration_ms.and_then(|d| i64::try_from(d).ok()),
            blob_key: blob_key.clone(),
            content_hash: hash.to_hex(),
            content_length: received as i64,
            content_type: media.as_str().to_string(),
            artwork: request.artwork.clone(),
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.metadata.create_song(&row).await {
            tracing::warn!(song_id = %song_id, blob_key = %blob_key, error = %e, "Song record write failed, removing blob");
            self.compensate(&row).await;
            guard.disarm();
            return Err(LibraryError::StorageWriteFailed(e.to_string()));
        }

        guard.disarm();
        metrics::INGESTED_BYTES.inc_by(received);
        tracing::info!(song_id = %song_id, blob_key = %blob_key, size = received, "Song ingested");

        Song::try_from(row)
    }

    /// Delete a committed blob whose record could not be written.
    async fn compensate(&self, row: &SongRow) {
        metrics::COMPENSATING_DELETES.inc();
        match self.storage.delete(&row.blob_key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => {
                tracing::error!(blob_key = %row.blob_key, error = %e, "Compensating delete failed");
                let tombstone = BlobTombstoneRow {
                    blob_key: row.blob_key.clone(),
                    song_id: row.song_id,
                    deleted_at: OffsetDateTime::now_utc(),
                };
                if let Err(e) = self.metadata.create_blob_tombstone(&tombstone).await {
                    tracing::error!(blob_key = %row.blob_key, error = %e, "Failed to tombstone orphaned blob; storage sweep will reclaim it");
                }
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn error_label(e: &LibraryError) -> &'static str {
    match e {
        LibraryError::InvalidFormat(_) => "invalid_format",
        LibraryError::TooLarge { .. } => "too_large",
        LibraryError::IncompleteStream { .. } => "incomplete_stream",
        LibraryError::StorageWriteFailed(_) => "storage_write_failed",
        _ => "invalid_input",
    }
}
