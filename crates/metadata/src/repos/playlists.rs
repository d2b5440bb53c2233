//! Playlist repository.

use crate::error::MetadataResult;
use crate::models::{PlaylistEntryRow, PlaylistRow};
use async_trait::async_trait;
use cadence_core::{PlaylistId, SongId};
use time::OffsetDateTime;

/// Repository for playlists and their ordered entries.
#[async_trait]
pub trait PlaylistRepo: Send + Sync {
    async fn create_playlist(&self, playlist: &PlaylistRow) -> MetadataResult<()>;

    async fn get_playlist(&self, playlist_id: PlaylistId) -> MetadataResult<Option<PlaylistRow>>;

    /// All playlists, by name.
    async fn list_playlists(&self) -> MetadataResult<Vec<PlaylistRow>>;

    async fn rename_playlist(
        &self,
        playlist_id: PlaylistId,
        name: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<PlaylistRow>;

    /// Append a song at the next free position.
    ///
    /// The song is not checked here; entries may reference songs that do
    /// not exist.
    async fn append_playlist_entry(
        &self,
        playlist_id: PlaylistId,
        song_id: SongId,
        now: OffsetDateTime,
    ) -> MetadataResult<PlaylistEntryRow>;

    /// Remove the entry at `position`; later entries shift down by one.
    async fn remove_playlist_entry(
        &self,
        playlist_id: PlaylistId,
        position: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Entries ordered by position.
    async fn get_playlist_entries(
        &self,
        playlist_id: PlaylistId,
    ) -> MetadataResult<Vec<PlaylistEntryRow>>;

    /// Drop entries whose song no longer exists and renumber the rest.
    /// Returns the number of entries removed.
    async fn remove_dangling_entries(
        &self,
        playlist_id: PlaylistId,
        now: OffsetDateTime,
    ) -> MetadataResult<u64>;

    /// Delete a playlist and its entries.
    async fn delete_playlist(&self, playlist_id: PlaylistId) -> MetadataResult<()>;
}
