//! The server side of the mirror.

use async_trait::async_trait;
use bytes::Bytes;
use cadence_core::SongId;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use time::OffsetDateTime;

/// Errors reported by a [`RemoteLibrary`].
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("song {0} not found on server")]
    NotFound(SongId),

    #[error("server unavailable: {0}")]
    Unavailable(String),
}

/// Audio payload as it arrives from the server.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes, RemoteError>> + Send>>;

/// Metadata of a song as the server reported it when it was fetched.
///
/// Mirrors the song JSON of the HTTP API; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongSnapshot {
    pub id: SongId,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    pub content_type: String,
    pub content_length: u64,
    pub content_hash: String,
    #[serde(default)]
    pub artwork: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Source of songs for the offline cache.
#[async_trait]
pub trait RemoteLibrary: Send + Sync {
    /// Current metadata of one song.
    async fn fetch_song(&self, id: SongId) -> Result<SongSnapshot, RemoteError>;

    /// The full audio payload of one song.
    async fn fetch_audio(&self, id: SongId) -> Result<AudioStream, RemoteError>;

    /// Every song the server currently holds.
    async fn list_catalog(&self) -> Result<Vec<SongSnapshot>, RemoteError>;
}
