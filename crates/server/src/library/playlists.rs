//! Playlists: named, ordered lists of song references.
//!
//! A reference whose song has been deleted is surfaced as
//! [`PlaylistEntry::Dangling`]. It is never resolved to another song and
//! never silently dropped; [`Library::prune_playlist`] removes such entries
//! on request.

use super::error::{LibraryError, LibraryResult};
use super::{Library, Song};
use cadence_core::{PlaylistId, SongId};
use cadence_metadata::models::PlaylistRow;
use cadence_metadata::repos::{PlaylistRepo, SongRepo};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::instrument;

/// Playlist header without its entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<PlaylistRow> for Playlist {
    fn from(row: PlaylistRow) -> Self {
        Self {
            id: PlaylistId::from_uuid(row.playlist_id),
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// One resolved playlist position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaylistEntry {
    Song { position: u64, song: Song },
    Dangling { position: u64, song_id: SongId },
}

impl PlaylistEntry {
    pub fn position(&self) -> u64 {
        match self {
            Self::Song { position, .. } | Self::Dangling { position, .. } => *position,
        }
    }

    pub fn is_dangling(&self) -> bool {
        matches!(self, Self::Dangling { .. })
    }
}

/// A playlist with its entries in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistView {
    #[serde(flatten)]
    pub playlist: Playlist,
    pub entries: Vec<PlaylistEntry>,
}

fn playlist_name(name: &str) -> LibraryResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LibraryError::InvalidInput(
            "playlist name cannot be empty".to_string(),
        ));
    }
    Ok(name)
}

impl Library {
    #[instrument(skip(self))]
    pub async fn create_playlist(&self, name: &str) -> LibraryResult<Playlist> {
        let name = playlist_name(name)?;
        let now = OffsetDateTime::now_utc();
        let row = PlaylistRow {
            playlist_id: *PlaylistId::new().as_uuid(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.metadata.create_playlist(&row).await?;
        tracing::info!(playlist_id = %row.playlist_id, "Playlist created");
        Ok(row.into())
    }

    /// Load a playlist and resolve each entry against the catalog.
    pub async fn get_playlist(&self, playlist_id: PlaylistId) -> LibraryResult<PlaylistView> {
        let row = self
            .metadata
            .get_playlist(playlist_id)
            .await?
            .ok_or_else(|| LibraryError::NotFound(format!("playlist {playlist_id}")))?;

        let entries = self.metadata.get_playlist_entries(playlist_id).await?;
        let mut resolved = Vec::with_capacity(entries.len());
        for entry in entries {
            let position = u64::try_from(entry.position).unwrap_or_default();
            let song_id = SongId::from_uuid(entry.song_id);
            match self.metadata.get_song(song_id).await? {
                Some(song) => resolved.push(PlaylistEntry::Song {
                    position,
                    song: Song::try_from(song)?,
                }),
                None => resolved.push(PlaylistEntry::Dangling { position, song_id }),
            }
        }

        Ok(PlaylistView {
            playlist: row.into(),
            entries: resolved,
        })
    }

    pub async fn list_playlists(&self) -> LibraryResult<Vec<Playlist>> {
        let rows = self.metadata.list_playlists().await?;
        Ok(rows.into_iter().map(Playlist::from).collect())
    }

    pub async fn rename_playlist(
        &self,
        playlist_id: PlaylistId,
        name: &str,
    ) -> LibraryResult<Playlist> {
        let name = playlist_name(name)?;
        let row = self
            .metadata
            .rename_playlist(playlist_id, name, OffsetDateTime::now_utc())
            .await?;
        Ok(row.into())
    }

    /// Append a song. The song must exist at the time it is added.
    #[instrument(skip(self), fields(playlist_id = %playlist_id, song_id = %song_id))]
    pub async fn add_to_playlist(
        &self,
        playlist_id: PlaylistId,
        song_id: SongId,
    ) -> LibraryResult<PlaylistView> {
        if self.metadata.get_song(song_id).await?.is_none() {
            return Err(LibraryError::NotFound(format!("song {song_id}")));
        }
        self.metadata
            .append_playlist_entry(playlist_id, song_id, OffsetDateTime::now_utc())
            .await?;
        self.get_playlist(playlist_id).await
    }

    pub async fn remove_from_playlist(
        &self,
        playlist_id: PlaylistId,
        position: u64,
    ) -> LibraryResult<PlaylistView> {
        let position = i64::try_from(position)
            .map_err(|_| LibraryError::InvalidInput(format!("position {position} out of range")))?;
        self.metadata
            .remove_playlist_entry(playlist_id, position, OffsetDateTime::now_utc())
            .await?;
        self.get_playlist(playlist_id).await
    }

    /// Remove dangling entries. Returns how many were removed.
    #[instrument(skip(self), fields(playlist_id = %playlist_id))]
    pub async fn prune_playlist(&self, playlist_id: PlaylistId) -> LibraryResult<u64> {
        let removed = self
            .metadata
            .remove_dangling_entries(playlist_id, OffsetDateTime::now_utc())
            .await?;
        if removed > 0 {
            tracing::info!(removed, "Pruned dangling playlist entries");
        }
        Ok(removed)
    }

    pub async fn delete_playlist(&self, playlist_id: PlaylistId) -> LibraryResult<()> {
        self.metadata.delete_playlist(playlist_id).await?;
        Ok(())
    }
}
