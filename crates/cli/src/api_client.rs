use anyhow::{Context, Result};
use async_trait::async_trait;
use cadence_core::SongId;
use cadence_offline::{AudioStream, RemoteError, RemoteLibrary, SongSnapshot};
use futures::StreamExt;
use reqwest::Url;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// A non-2xx response, carrying the server's `{code, message}` body.
#[derive(Debug, thiserror::Error)]
#[error("API error ({status}) {code}: {message}")]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    /// Send a request and fail with [`ApiError`] on a non-2xx status.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = req.send().await.context("request failed")?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(parsed) => (parsed.code, parsed.message),
            Err(_) => ("unknown".to_string(), body),
        };
        Err(ApiError {
            status: status.as_u16(),
            code,
            message,
        }
        .into())
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = self.send(req).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).context("unexpected response body")
    }

    async fn send_empty(&self, req: reqwest::RequestBuilder) -> Result<()> {
        self.send(req).await?;
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/v1/health")?;
        self.send_json(self.http.get(url)).await
    }

    /// Upload `body` as a new song. `size` becomes the declared Content-Length.
    pub async fn upload_song(
        &self,
        body: reqwest::Body,
        size: u64,
        req: &UploadRequest,
    ) -> Result<SongSnapshot> {
        let url = self.url("/v1/songs")?;
        let mut builder = self
            .http
            .post(url)
            .header(CONTENT_TYPE, &req.content_type)
            .header(CONTENT_LENGTH, size)
            .body(body);
        if let Some(title) = &req.title {
            builder = builder.header("x-song-title", title);
        }
        if let Some(artist) = &req.artist {
            builder = builder.header("x-song-artist", artist);
        }
        if let Some(duration_ms) = req.duration_ms {
            builder = builder.header("x-song-duration-ms", duration_ms);
        }
        self.send_json(builder).await
    }

    pub async fn list_songs(
        &self,
        query: Option<&str>,
        sort: Option<&str>,
    ) -> Result<Vec<SongSnapshot>> {
        let mut url = self.url("/v1/songs")?;
        if let Some(query) = query {
            url.query_pairs_mut().append_pair("q", query);
        }
        if let Some(sort) = sort {
            url.query_pairs_mut().append_pair("sort", sort);
        }
        self.send_json(self.http.get(url)).await
    }

    pub async fn get_song(&self, id: &str) -> Result<SongSnapshot> {
        let url = self.url(&format!("/v1/songs/{id}"))?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn update_song(&self, id: &str, req: &UpdateSongRequest) -> Result<SongSnapshot> {
        let url = self.url(&format!("/v1/songs/{id}"))?;
        self.send_json(self.http.patch(url).json(req)).await
    }

    pub async fn delete_song(&self, id: &str) -> Result<DeleteSongResponse> {
        let url = self.url(&format!("/v1/songs/{id}"))?;
        self.send_json(self.http.delete(url)).await
    }

    /// Start a download. `range` is the part after `bytes=`, e.g. `0-1023`.
    pub async fn open_audio(&self, id: &str, range: Option<&str>) -> Result<reqwest::Response> {
        let url = self.url(&format!("/v1/songs/{id}/download"))?;
        let mut builder = self.http.get(url);
        if let Some(range) = range {
            builder = builder.header(RANGE, format!("bytes={range}"));
        }
        self.send(builder).await
    }

    pub async fn create_playlist(&self, name: &str) -> Result<PlaylistResponse> {
        let url = self.url("/v1/playlists")?;
        self.send_json(self.http.post(url).json(&PlaylistNameRequest { name })).await
    }

    pub async fn list_playlists(&self) -> Result<Vec<PlaylistResponse>> {
        let url = self.url("/v1/playlists")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn get_playlist(&self, id: &str) -> Result<PlaylistView> {
        let url = self.url(&format!("/v1/playlists/{id}"))?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn rename_playlist(&self, id: &str, name: &str) -> Result<PlaylistResponse> {
        let url = self.url(&format!("/v1/playlists/{id}"))?;
        self.send_json(self.http.patch(url).json(&PlaylistNameRequest { name }))
            .await
    }

    pub async fn add_to_playlist(&self, id: &str, song_id: &str) -> Result<PlaylistView> {
        let url = self.url(&format!("/v1/playlists/{id}/entries"))?;
        self.send_json(self.http.post(url).json(&AddEntryRequest { song_id }))
            .await
    }

    pub async fn remove_from_playlist(&self, id: &str, position: u64) -> Result<PlaylistView> {
        let url = self.url(&format!("/v1/playlists/{id}/entries/{position}"))?;
        self.send_json(self.http.delete(url)).await
    }

    pub async fn prune_playlist(&self, id: &str) -> Result<PruneResponse> {
        let url = self.url(&format!("/v1/playlists/{id}/prune"))?;
        self.send_json(self.http.post(url)).await
    }

    pub async fn delete_playlist(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("/v1/playlists/{id}"))?;
        self.send_empty(self.http.delete(url)).await
    }

    pub async fn trigger_gc(&self, req: TriggerGcRequest) -> Result<TriggerGcResponse> {
        let url = self.url("/v1/admin/gc")?;
        self.send_json(self.http.post(url).json(&req)).await
    }

    pub async fn list_gc_jobs(&self, limit: Option<u32>) -> Result<Vec<GcJobResponse>> {
        let mut url = self.url("/v1/admin/gc")?;
        if let Some(limit) = limit {
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string());
        }
        self.send_json(self.http.get(url)).await
    }

    pub async fn get_gc_job(&self, id: &str) -> Result<GcJobResponse> {
        let url = self.url(&format!("/v1/admin/gc/{id}"))?;
        self.send_json(self.http.get(url)).await
    }
}

/// Map a client failure onto the offline cache's error type.
fn remote_error(song_id: Option<SongId>, err: anyhow::Error) -> RemoteError {
    if let Some(id) = song_id
        && let Some(api) = err.downcast_ref::<ApiError>()
        && api.status == 404
    {
        return RemoteError::NotFound(id);
    }
    RemoteError::Unavailable(format!("{err:#}"))
}

#[async_trait]
impl RemoteLibrary for ApiClient {
    async fn fetch_song(&self, id: SongId) -> Result<SongSnapshot, RemoteError> {
        self.get_song(&id.to_string())
            .await
            .map_err(|e| remote_error(Some(id), e))
    }

    async fn fetch_audio(&self, id: SongId) -> Result<AudioStream, RemoteError> {
        let url = self
            .url(&format!("/v1/songs/{id}/stream"))
            .map_err(|e| remote_error(Some(id), e))?;
        let response = self
            .send(self.http.get(url))
            .await
            .map_err(|e| remote_error(Some(id), e))?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| RemoteError::Unavailable(e.to_string())));
        Ok(Box::pin(stream))
    }

    async fn list_catalog(&self) -> Result<Vec<SongSnapshot>, RemoteError> {
        self.list_songs(None, None)
            .await
            .map_err(|e| remote_error(None, e))
    }
}

// =============================================================================
// Request/response types (mirrored from server handlers)
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub content_type: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Default, Serialize)]
pub struct UpdateSongRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteSongResponse {
    pub song_id: String,
    /// `deleted` or `blob_cleanup_deferred`.
    pub outcome: String,
}

#[derive(Debug, Serialize)]
struct PlaylistNameRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct AddEntryRequest<'a> {
    song_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistResponse {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistView {
    #[serde(flatten)]
    pub playlist: PlaylistResponse,
    pub entries: Vec<PlaylistEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaylistEntry {
    Song { position: u64, song: SongSnapshot },
    /// The song was deleted after it was added.
    Dangling { position: u64, song_id: String },
}

#[derive(Debug, Deserialize)]
pub struct PruneResponse {
    pub removed: u64,
}

#[derive(Debug, Serialize)]
pub struct TriggerGcRequest {
    pub job_type: String,
}

#[derive(Debug, Deserialize)]
pub struct TriggerGcResponse {
    pub job_id: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct GcStats {
    pub items_processed: u64,
    pub items_deleted: u64,
    pub bytes_reclaimed: u64,
    pub errors: u64,
}

#[derive(Debug, Deserialize)]
pub struct GcJobResponse {
    pub job_id: String,
    pub job_type: String,
    pub state: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub stats: Option<GcStats>,
}
