//! Song repository.

use crate::error::MetadataResult;
use crate::models::{SongPatch, SongQuery, SongRow};
use async_trait::async_trait;
use cadence_core::SongId;
use time::OffsetDateTime;

/// Repository for song records.
#[async_trait]
pub trait SongRepo: Send + Sync {
    /// Insert a new song. Fails with `AlreadyExists` if the id is taken.
    async fn create_song(&self, song: &SongRow) -> MetadataResult<()>;

    /// Get a song by ID.
    async fn get_song(&self, song_id: SongId) -> MetadataResult<Option<SongRow>>;

    /// Apply a patch and return the updated row.
    async fn update_song(
        &self,
        song_id: SongId,
        patch: &SongPatch,
        now: OffsetDateTime,
    ) -> MetadataResult<SongRow>;

    /// Remove a song and record a tombstone for its blob, atomically.
    ///
    /// Returns the removed row so the caller can delete the blob.
    async fn delete_song(&self, song_id: SongId, now: OffsetDateTime) -> MetadataResult<SongRow>;

    /// List songs matching a query. Never cached.
    async fn list_songs(&self, query: &SongQuery) -> MetadataResult<Vec<SongRow>>;

    /// Whether any song currently points at this blob key.
    async fn blob_key_referenced(&self, blob_key: &str) -> MetadataResult<bool>;
}
