//! Metadata store test utilities.

use async_trait::async_trait;
use cadence_core::{PlaylistId, SongId};
use cadence_metadata::models::{
    BlobTombstoneRow, GcJobRow, PlaylistEntryRow, PlaylistRow, SongPatch, SongQuery, SongRow,
};
use cadence_metadata::repos::{GcRepo, PlaylistRepo, SongRepo, TombstoneRepo};
use cadence_metadata::{MetadataError, MetadataResult, MetadataStore, PostgresStore, SqliteStore};
use sqlx::{Pool, Postgres as SqlxPostgres, Sqlite};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use time::OffsetDateTime;
use uuid::Uuid;

/// Prefix on errors caused by the Postgres container failing to start.
/// Tests match on it to skip when Docker is unavailable.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// A SQLite library database in a temp directory.
#[allow(dead_code)]
pub struct TestMetadata {
    pub store: Arc<dyn MetadataStore>,
    pub(crate) sqlite_store: Arc<SqliteStore>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let store = Arc::new(SqliteStore::new(temp_dir.path().join("library.db"), None).await?);

        Ok(Self {
            store: store.clone(),
            sqlite_store: store,
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    /// Raw pool for assertions the repository traits do not expose.
    pub fn pool(&self) -> &Pool<Sqlite> {
        self.sqlite_store.pool()
    }
}

/// A PostgreSQL library database running in a testcontainer.
#[allow(dead_code)]
pub struct PostgresTestMetadata {
    pub store: Arc<dyn MetadataStore>,
    pub(crate) postgres_store: Arc<PostgresStore>,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl PostgresTestMetadata {
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                MetadataError::Internal(format!(
                    "{} Failed to start PostgreSQL container: {e}",
                    POSTGRES_CONTAINER_START_ERR_PREFIX
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        let store = Arc::new(PostgresStore::new(&url, 5, None).await?);

        Ok(Self {
            store: store.clone(),
            postgres_store: store,
            _container: container,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    pub fn pool(&self) -> &Pool<SqlxPostgres> {
        self.postgres_store.pool()
    }
}

/// Run a test against SQLite, then against PostgreSQL when Docker is around.
///
/// Set `SKIP_POSTGRES_TESTS` to run SQLite only.
#[allow(dead_code)]
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestMetadata::new()
        .await
        .expect("Failed to create SQLite test metadata");
    test_fn.clone()(sqlite.store()).await;

    if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
        return;
    }
    match PostgresTestMetadata::new().await {
        Ok(postgres) => test_fn(postgres.store()).await,
        Err(err) if err.to_string().contains(POSTGRES_CONTAINER_START_ERR_PREFIX) => {
            eprintln!("Skipping PostgreSQL metadata tests: {err}");
        }
        Err(err) => panic!("PostgreSQL test setup failed: {err}"),
    }
}

/// Wraps a metadata store and fails selected operations while a switch is on.
#[allow(dead_code)]
pub struct FlakyMetadata {
    inner: Arc<dyn MetadataStore>,
    pub fail_create_song: AtomicBool,
    pub fail_health: AtomicBool,
}

#[allow(dead_code)]
impl FlakyMetadata {
    pub fn new(inner: Arc<dyn MetadataStore>) -> Self {
        Self {
            inner,
            fail_create_song: AtomicBool::new(false),
            fail_health: AtomicBool::new(false),
        }
    }

    fn injected(op: &str) -> MetadataError {
        MetadataError::Internal(format!("injected {op} failure"))
    }
}

#[async_trait]
impl SongRepo for FlakyMetadata {
    async fn create_song(&self, song: &SongRow) -> MetadataResult<()> {
        if self.fail_create_song.load(Ordering::SeqCst) {
            return Err(Self::injected("create_song"));
        }
        self.inner.create_song(song).await
    }

    async fn get_song(&self, song_id: SongId) -> MetadataResult<Option<SongRow>> {
        self.inner.get_song(song_id).await
    }

    async fn update_song(
        &self,
        song_id: SongId,
        patch: &SongPatch,
        now: OffsetDateTime,
    ) -> MetadataResult<SongRow> {
        self.inner.update_song(song_id, patch, now).await
    }

    async fn delete_song(&self, song_id: SongId, now: OffsetDateTime) -> MetadataResult<SongRow> {
        self.inner.delete_song(song_id, now).await
    }

    async fn list_songs(&self, query: &SongQuery) -> MetadataResult<Vec<SongRow>> {
        self.inner.list_songs(query).await
    }

    async fn blob_key_referenced(&self, blob_key: &str) -> MetadataResult<bool> {
        self.inner.blob_key_referenced(blob_key).await
    }
}

#[async_trait]
impl PlaylistRepo for FlakyMetadata {
    async fn create_playlist(&self, playlist: &PlaylistRow) -> MetadataResult<()> {
        self.inner.create_playlist(playlist).await
    }

    async fn get_playlist(&self, playlist_id: PlaylistId) -> MetadataResult<Option<PlaylistRow>> {
        self.inner.get_playlist(playlist_id).await
    }

    async fn list_playlists(&self) -> MetadataResult<Vec<PlaylistRow>> {
        self.inner.list_playlists().await
    }

    async fn rename_playlist(
        &self,
        playlist_id: PlaylistId,
        name: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<PlaylistRow> {
        self.inner.rename_playlist(playlist_id, name, now).await
    }

    async fn append_playlist_entry(
        &self,
        playlist_id: PlaylistId,
        song_id: SongId,
        now: OffsetDateTime,
    ) -> MetadataResult<PlaylistEntryRow> {
        self.inner
            .append_playlist_entry(playlist_id, song_id, now)
            .await
    }

    async fn remove_playlist_entry(
        &self,
        playlist_id: PlaylistId,
        position: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        self.inner
            .remove_playlist_entry(playlist_id, position, now)
            .await
    }

    async fn get_playlist_entries(
        &self,
        playlist_id: PlaylistId,
    ) -> MetadataResult<Vec<PlaylistEntryRow>> {
        self.inner.get_playlist_entries(playlist_id).await
    }

    async fn remove_dangling_entries(
        &self,
        playlist_id: PlaylistId,
        now: OffsetDateTime,
    ) -> MetadataResult<u64> {
        self.inner.remove_dangling_entries(playlist_id, now).await
    }

    async fn delete_playlist(&self, playlist_id: PlaylistId) -> MetadataResult<()> {
        self.inner.delete_playlist(playlist_id).await
    }
}

#[async_trait]
impl TombstoneRepo for FlakyMetadata {
    async fn create_blob_tombstone(&self, tombstone: &BlobTombstoneRow) -> MetadataResult<()> {
        self.inner.create_blob_tombstone(tombstone).await
    }

    async fn get_pending_blob_tombstones(
        &self,
        limit: u32,
    ) -> MetadataResult<Vec<BlobTombstoneRow>> {
        self.inner.get_pending_blob_tombstones(limit).await
    }

    async fn delete_blob_tombstone(&self, blob_key: &str) -> MetadataResult<()> {
        self.inner.delete_blob_tombstone(blob_key).await
    }
}

#[async_trait]
impl GcRepo for FlakyMetadata {
    async fn create_gc_job(&self, job: &GcJobRow) -> MetadataResult<()> {
        self.inner.create_gc_job(job).await
    }

    async fn get_gc_job(&self, job_id: Uuid) -> MetadataResult<Option<GcJobRow>> {
        self.inner.get_gc_job(job_id).await
    }

    async fn update_gc_job_state(
        &self,
        job_id: Uuid,
        state: &str,
        finished_at: Option<OffsetDateTime>,
        stats_json: Option<&str>,
    ) -> MetadataResult<()> {
        self.inner
            .update_gc_job_state(job_id, state, finished_at, stats_json)
            .await
    }

    async fn get_recent_gc_jobs(&self, limit: u32) -> MetadataResult<Vec<GcJobRow>> {
        self.inner.get_recent_gc_jobs(limit).await
    }

    async fn get_active_gc_jobs(&self, job_type: &str) -> MetadataResult<Vec<GcJobRow>> {
        self.inner.get_active_gc_jobs(job_type).await
    }

    async fn get_orphaned_gc_jobs(&self) -> MetadataResult<Vec<GcJobRow>> {
        self.inner.get_orphaned_gc_jobs().await
    }
}

#[async_trait]
impl MetadataStore for FlakyMetadata {
    async fn migrate(&self) -> MetadataResult<()> {
        self.inner.migrate().await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        if self.fail_health.load(Ordering::SeqCst) {
            return Err(Self::injected("health check"));
        }
        self.inner.health_check().await
    }
}
