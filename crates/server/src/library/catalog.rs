//! Catalog listing and song record maintenance.

use super::error::{LibraryError, LibraryResult};
use super::{Library, Song};
use cadence_core::SongId;
use cadence_metadata::repos::{SongRepo, TombstoneRepo};
use cadence_metadata::{SongPatch, SongQuery, SortOrder};
use cadence_storage::StorageError;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::instrument;

/// Corrections to a song's descriptive fields.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SongUpdate {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_ms: Option<u64>,
    pub artwork: Option<String>,
}

/// How far a delete got.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// Record and blob are both gone.
    Deleted,
    /// Record is gone; the blob is tombstoned for the next reconciliation run.
    BlobCleanupDeferred,
}

impl Library {
    /// List songs, optionally filtered and sorted. Reads the store every call.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filter: Option<&str>,
        sort: Option<SortOrder>,
    ) -> LibraryResult<Vec<Song>> {
        let query = SongQuery {
            filter: filter
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string),
            sort: sort.unwrap_or_default(),
        };

        self.metadata
            .list_songs(&query)
            .await?
            .into_iter()
            .map(Song::try_from)
            .collect()
    }

    pub async fn get(&self, song_id: SongId) -> LibraryResult<Song> {
        let row = self
            .metadata
            .get_song(song_id)
            .await?
            .ok_or_else(|| LibraryError::NotFound(format!("song {song_id}")))?;
        Song::try_from(row)
    }

    /// Apply descriptive corrections. Blank title or artist is rejected.
    #[instrument(skip(self, update), fields(song_id = %song_id))]
    pub async fn update(&self, song_id: SongId, update: SongUpdate) -> LibraryResult<Song> {
        let patch = SongPatch {
            title: required_text("title", update.title)?,
            artist: required_text("artist", update.artist)?,
            duration_ms: update
                .duration_ms
                .map(|d| {
                    i64::try_from(d)
                        .map_err(|_| LibraryError::InvalidInput("duration_ms out of range".into()))
                })
                .transpose()?,
            artwork: update.artwork,
        };

        if patch.is_empty() {
            return self.get(song_id).await;
        }

        let row = self
            .metadata
            .update_song(song_id, &patch, OffsetDateTime::now_utc())
            .await?;
        tracing::info!(song_id = %song_id, "Song updated");
        Song::try_from(row)
    }

    /// Delete a song's record and then its blob.
    ///
    /// The record removal and the blob tombstone commit together, so a
    /// failed blob delete leaves work for reconciliation rather than an
    /// untracked orphan.
    #[instrument(skip(self), fields(song_id = %song_id))]
    pub async fn delete(&self, song_id: SongId) -> LibraryResult<DeleteOutcome> {
        let row = self
            .metadata
            .delete_song(song_id, OffsetDateTime::now_utc())
            .await?;

        let blob_deleted = match self.storage.delete(&row.blob_key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => true,
            Err(e) => {
                tracing::warn!(
                    blob_key = %row.blob_key,
                    error = %e,
                    "Blob delete failed, leaving tombstone for reconciliation"
                );
                false
            }
        };
        if !blob_deleted {
            return Ok(DeleteOutcome::BlobCleanupDeferred);
        }

        if let Err(e) = self.metadata.delete_blob_tombstone(&row.blob_key).await {
            // Harmless: the tombstone job treats a missing blob as done.
            tracing::debug!(blob_key = %row.blob_key, error = %e, "Failed to clear tombstone");
        }

        tracing::info!(song_id = %song_id, blob_key = %row.blob_key, "Song deleted");
        Ok(DeleteOutcome::Deleted)
    }
}

fn required_text(field: &str, value: Option<String>) -> LibraryResult<Option<String>> {
    match value {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Err(LibraryError::InvalidInput(format!(
            "{field} cannot be empty"
        ))),
        Some(v) => Ok(Some(v.trim().to_string())),
    }
}
