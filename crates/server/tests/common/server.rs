//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use cadence_core::config::{AppConfig, MetadataConfig, StorageConfig};
use cadence_metadata::{MetadataStore, SqliteStore};
use cadence_server::state::GcTaskRegistry;
use cadence_server::{AppState, create_router};
use cadence_storage::{FilesystemBackend, ObjectStore};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

/// A buffered response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        if self.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&self.body).unwrap_or(Value::Null)
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server backed by a temp directory.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, |storage, metadata| (storage, metadata)).await
    }

    /// Create a test server whose stores are wrapped before use, so tests
    /// can inject failures.
    pub async fn with_stores<W>(wrap: W) -> Self
    where
        W: FnOnce(
            Arc<dyn ObjectStore>,
            Arc<dyn MetadataStore>,
        ) -> (Arc<dyn ObjectStore>, Arc<dyn MetadataStore>),
    {
        Self::build(|_| {}, wrap).await
    }

    async fn build<F, W>(modifier: F, wrap: W) -> Self
    where
        F: FnOnce(&mut AppConfig),
        W: FnOnce(
            Arc<dyn ObjectStore>,
            Arc<dyn MetadataStore>,
        ) -> (Arc<dyn ObjectStore>, Arc<dyn MetadataStore>),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        std::fs::create_dir_all(&storage_path).expect("Failed to create storage directory");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("library.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let (storage, metadata) = wrap(storage, metadata);

        let mut config = AppConfig {
            storage: StorageConfig::Filesystem { path: storage_path },
            metadata: MetadataConfig::Sqlite {
                path: db_path,
                query_timeout_secs: None,
            },
            ..AppConfig::for_testing()
        };
        modifier(&mut config);

        let gc_task_registry = Arc::new(GcTaskRegistry::new(metadata.clone()));
        let state = AppState::new(config, storage, metadata, gc_task_registry);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    pub fn storage(&self) -> Arc<dyn ObjectStore> {
        self.state.storage.clone()
    }

    /// Send a request and buffer the whole response.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Send a request with an optional JSON body.
    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    /// Upload `data` as a song with the given content type and tags.
    pub async fn upload(
        &self,
        content_type: &str,
        data: Bytes,
        title: Option<&str>,
        artist: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/songs")
            .header("Content-Type", content_type)
            .header("Content-Length", data.len());
        if let Some(title) = title {
            builder = builder.header("X-Song-Title", title);
        }
        if let Some(artist) = artist {
            builder = builder.header("X-Song-Artist", artist);
        }
        self.send(builder.body(Body::from(data)).unwrap()).await
    }

    /// Upload a song and return its ID, panicking on failure.
    pub async fn upload_song(&self, data: Bytes, title: &str, artist: &str) -> String {
        let response = self
            .upload("audio/mpeg", data, Some(title), Some(artist))
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.json());
        response.json()["id"].as_str().unwrap().to_string()
    }
}
