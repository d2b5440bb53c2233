//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use axum::body::Body;
use cadence_core::{PlaylistId, SongId};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

/// Maximum size of a JSON request body (64 KiB).
pub const MAX_JSON_BODY_SIZE: usize = 64 * 1024;

/// Read and parse a JSON request body, reporting failures as `bad_request`.
pub async fn read_json<T: DeserializeOwned>(body: Body) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(body, MAX_JSON_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

pub fn parse_song_id(raw: &str) -> ApiResult<SongId> {
    SongId::parse(raw).map_err(|e| ApiError::BadRequest(format!("invalid song ID: {e}")))
}

pub fn parse_playlist_id(raw: &str) -> ApiResult<PlaylistId> {
    PlaylistId::parse(raw).map_err(|e| ApiError::BadRequest(format!("invalid playlist ID: {e}")))
}

pub fn format_timestamp(t: OffsetDateTime) -> ApiResult<String> {
    t.format(&time::format_description::well_known::Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format timestamp: {e}")))
}
