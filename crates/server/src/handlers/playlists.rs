//! Playlist endpoints.

use crate::error::ApiResult;
use crate::handlers::common::{parse_playlist_id, parse_song_id, read_json};
use crate::library::{Playlist, PlaylistView};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// Create or rename request.
#[derive(Debug, Deserialize)]
pub struct PlaylistNameRequest {
    pub name: String,
}

/// Append request.
#[derive(Debug, Deserialize)]
pub struct AddEntryRequest {
    pub song_id: String,
}

#[derive(Debug, Serialize)]
pub struct PruneResponse {
    pub removed: u64,
}

/// POST /v1/playlists
pub async fn create_playlist(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<Playlist>)> {
    let body: PlaylistNameRequest = read_json(req.into_body()).await?;
    let playlist = state.library.create_playlist(&body.name).await?;
    Ok((StatusCode::CREATED, Json(playlist)))
}

/// GET /v1/playlists
pub async fn list_playlists(State(state): State<AppState>) -> ApiResult<Json<Vec<Playlist>>> {
    Ok(Json(state.library.list_playlists().await?))
}

/// GET /v1/playlists/{playlist_id} - Entries resolved, dangling ones marked.
pub async fn get_playlist(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
) -> ApiResult<Json<PlaylistView>> {
    let playlist_id = parse_playlist_id(&playlist_id)?;
    Ok(Json(state.library.get_playlist(playlist_id).await?))
}

/// PATCH /v1/playlists/{playlist_id}
pub async fn rename_playlist(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
    req: Request,
) -> ApiResult<Json<Playlist>> {
    let playlist_id = parse_playlist_id(&playlist_id)?;
    let body: PlaylistNameRequest = read_json(req.into_body()).await?;
    Ok(Json(
        state
            .library
            .rename_playlist(playlist_id, &body.name)
            .await?,
    ))
}

/// DELETE /v1/playlists/{playlist_id}
pub async fn delete_playlist(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
) -> ApiResult<StatusCode> {
    let playlist_id = parse_playlist_id(&playlist_id)?;
    state.library.delete_playlist(playlist_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/playlists/{playlist_id}/entries
pub async fn add_entry(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
    req: Request,
) -> ApiResult<Json<PlaylistView>> {
    let playlist_id = parse_playlist_id(&playlist_id)?;
    let body: AddEntryRequest = read_json(req.into_body()).await?;
    let song_id = parse_song_id(&body.song_id)?;
    Ok(Json(
        state.library.add_to_playlist(playlist_id, song_id).await?,
    ))
}

/// DELETE /v1/playlists/{playlist_id}/entries/{position}
pub async fn remove_entry(
    State(state): State<AppState>,
    Path((playlist_id, position)): Path<(String, u64)>,
) -> ApiResult<Json<PlaylistView>> {
    let playlist_id = parse_playlist_id(&playlist_id)?;
    Ok(Json(
        state
            .library
            .remove_from_playlist(playlist_id, position)
            .await?,
    ))
}

/// POST /v1/playlists/{playlist_id}/prune - Drop dangling entries.
pub async fn prune_playlist(
    State(state): State<AppState>,
    Path(playlist_id): Path<String>,
) -> ApiResult<Json<PruneResponse>> {
    let playlist_id = parse_playlist_id(&playlist_id)?;
    let removed = state.library.prune_playlist(playlist_id).await?;
    Ok(Json(PruneResponse { removed }))
}
