//! The content lifecycle core: ingestion, delivery, catalog and playlists.
//!
//! [`Library`] owns no state of its own beyond configuration; every call
//! goes straight to the blob store and the metadata store.

pub mod catalog;
pub mod delivery;
pub mod error;
pub mod ingest;
pub mod playlists;

pub use catalog::{DeleteOutcome, SongUpdate};
pub use delivery::{Disposition, Resolution, ResolutionStatus};
pub use error::{LibraryError, LibraryResult};
pub use ingest::IngestRequest;
pub use playlists::{Playlist, PlaylistEntry, PlaylistView};

use cadence_core::SongId;
use cadence_core::config::LibraryConfig;
use cadence_metadata::MetadataStore;
use cadence_metadata::models::SongRow;
use cadence_storage::ObjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

/// Entry point for all library operations.
#[derive(Clone)]
pub struct Library {
    storage: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    config: LibraryConfig,
}

impl Library {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        config: LibraryConfig,
    ) -> Self {
        Self {
            storage,
            metadata,
            config,
        }
    }

    pub fn storage(&self) -> &Arc<dyn ObjectStore> {
        &self.storage
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }
}

/// A stored song as seen by API callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    pub title: String,
    pub artist: String,
    pub duration_ms: Option<u64>,
    pub content_type: String,
    pub content_length: u64,
    pub content_hash: String,
    pub blob_key: String,
    pub artwork: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Payload size recorded for a song. A negative value means a corrupt row.
pub(crate) fn stored_length(row: &SongRow) -> LibraryResult<u64> {
    u64::try_from(row.content_length).map_err(|_| {
        LibraryError::InvalidInput(format!(
            "song {} has negative content length {}",
            row.song_id, row.content_length
        ))
    })
}

impl TryFrom<SongRow> for Song {
    type Error = LibraryError;

    fn try_from(row: SongRow) -> LibraryResult<Self> {
        let content_length = stored_length(&row)?;

        Ok(Self {
            id: SongId::from_uuid(row.song_id),
            title: row.title,
            artist: row.artist,
            duration_ms: row.duration_ms.and_then(|d| u64::try_from(d).ok()),
            content_type: row.content_type,
            content_length,
            content_hash: row.content_hash,
            blob_key: row.blob_key,
            artwork: row.artwork,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
