//! Song ingestion, catalog and delivery endpoints.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{parse_song_id, read_json};
use crate::library::{DeleteOutcome, Disposition, IngestRequest, ResolutionStatus, Song, SongUpdate};
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use cadence_core::RangeSpec;
use cadence_metadata::SortOrder;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

pub const TITLE_HEADER: &str = "x-song-title";
pub const ARTIST_HEADER: &str = "x-song-artist";
pub const DURATION_HEADER: &str = "x-song-duration-ms";
pub const ARTWORK_HEADER: &str = "x-song-artwork";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> ApiResult<Option<&'a str>> {
    headers
        .get(name)
        .map(|v| {
            v.to_str()
                .map_err(|_| ApiError::BadRequest(format!("{name} header is not valid text")))
        })
        .transpose()
}

/// Build an ingestion request from upload headers.
///
/// `Content-Length` is the declared size and is required; chunked uploads
/// without it are refused.
fn ingest_request(headers: &HeaderMap) -> ApiResult<IngestRequest> {
    let content_type = header_str(headers, CONTENT_TYPE.as_str())?
        .ok_or_else(|| ApiError::BadRequest("Content-Type header is required".to_string()))?;
    let declared_size = header_str(headers, CONTENT_LENGTH.as_str())?
        .ok_or(ApiError::LengthRequired)?
        .parse::<u64>()
        .map_err(|e| ApiError::BadRequest(format!("invalid Content-Length: {e}")))?;
    let duration_ms = header_str(headers, DURATION_HEADER)?
        .map(|v| {
            v.parse::<u64>()
                .map_err(|e| ApiError::BadRequest(format!("invalid {DURATION_HEADER}: {e}")))
        })
        .transpose()?;

    Ok(IngestRequest {
        content_type: content_type.to_string(),
        declared_size,
        title: header_str(headers, TITLE_HEADER)?.map(str::to_string),
        artist: header_str(headers, ARTIST_HEADER)?.map(str::to_string),
        duration_ms,
        artwork: header_str(headers, ARTWORK_HEADER)?.map(str::to_string),
    })
}

/// POST /v1/songs - Upload a song as the raw request body.
pub async fn upload_song(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<Song>)> {
    let request = ingest_request(req.headers())?;
    let stream = req.into_body().into_data_stream();
    let song = state.library.ingest(stream, request).await?;
    Ok((StatusCode::CREATED, Json(song)))
}

/// Query parameters for listing songs.
#[derive(Debug, Deserialize)]
pub struct ListSongsParams {
    /// Case-insensitive substring of title or artist.
    pub q: Option<String>,
    /// `created_desc` (default) or `title_asc`.
    pub sort: Option<String>,
}

/// GET /v1/songs - List the catalog.
pub async fn list_songs(
    State(state): State<AppState>,
    Query(params): Query<ListSongsParams>,
) -> ApiResult<Json<Vec<Song>>> {
    let sort = params
        .sort
        .as_deref()
        .map(|s| {
            SortOrder::parse(s).ok_or_else(|| ApiError::BadRequest(format!("invalid sort: {s}")))
        })
        .transpose()?;

    let songs = state.library.list(params.q.as_deref(), sort).await?;
    Ok(Json(songs))
}

/// GET /v1/songs/{song_id}
pub async fn get_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
) -> ApiResult<Json<Song>> {
    let song_id = parse_song_id(&song_id)?;
    Ok(Json(state.library.get(song_id).await?))
}

/// PATCH /v1/songs/{song_id} - Correct descriptive fields.
pub async fn update_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
    req: Request,
) -> ApiResult<Json<Song>> {
    let song_id = parse_song_id(&song_id)?;
    let update: SongUpdate = read_json(req.into_body()).await?;
    Ok(Json(state.library.update(song_id, update).await?))
}

/// Delete response.
#[derive(Debug, Serialize)]
pub struct DeleteSongResponse {
    pub song_id: String,
    pub outcome: DeleteOutcome,
}

/// DELETE /v1/songs/{song_id}
pub async fn delete_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
) -> ApiResult<Json<DeleteSongResponse>> {
    let song_id = parse_song_id(&song_id)?;
    let outcome = state.library.delete(song_id).await?;
    Ok(Json(DeleteSongResponse {
        song_id: song_id.to_string(),
        outcome,
    }))
}

/// GET /v1/songs/{song_id}/stream - Inline, range-aware playback.
pub async fn stream_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    deliver(&state, &song_id, &headers, Disposition::Inline).await
}

/// GET /v1/songs/{song_id}/download - Same bytes, labelled as an attachment.
pub async fn download_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    deliver(&state, &song_id, &headers, Disposition::Attachment).await
}

async fn deliver(
    state: &AppState,
    song_id: &str,
    headers: &HeaderMap,
    disposition: Disposition,
) -> ApiResult<Response> {
    let song_id = parse_song_id(song_id)?;
    let range = header_str(headers, RANGE.as_str())?
        .map(RangeSpec::parse_header)
        .transpose()?;

    let resolution = match state.library.resolve(song_id, range, disposition).await {
        Ok(resolution) => resolution,
        Err(e) => {
            if matches!(e, crate::library::LibraryError::RangeNotSatisfiable { .. }) {
                metrics::DELIVERIES
                    .with_label_values(&[disposition.as_str(), "unsatisfiable"])
                    .inc();
            }
            return Err(e.into());
        }
    };

    let stream = state.library.open_stream(&resolution).await?;
    let body_stream = stream.map(|result| {
        result.map_err(|e| {
            tracing::error!(error = %e, "Delivery failed mid-transfer");
            std::io::Error::other(e.to_string())
        })
    });

    let (status, label) = match resolution.status {
        ResolutionStatus::FullContent => (StatusCode::OK, "full"),
        ResolutionStatus::PartialContent => (StatusCode::PARTIAL_CONTENT, "partial"),
    };
    metrics::DELIVERIES
        .with_label_values(&[disposition.as_str(), label])
        .inc();
    metrics::DELIVERED_BYTES.inc_by(resolution.range.len());

    let mut response = (
        status,
        [
            (CONTENT_TYPE, resolution.content_type.clone()),
            (CONTENT_LENGTH, resolution.range.len().to_string()),
            (ACCEPT_RANGES, "bytes".to_string()),
            (CONTENT_DISPOSITION, resolution.content_disposition()),
        ],
        Body::from_stream(body_stream),
    )
        .into_response();

    if resolution.status == ResolutionStatus::PartialContent
        && let Ok(value) = resolution
            .range
            .content_range(resolution.total_length)
            .parse()
    {
        response.headers_mut().insert(CONTENT_RANGE, value);
    }
    Ok(response)
}
