//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{GcRepo, PlaylistRepo, SongRepo, TombstoneRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: SongRepo + PlaylistRepo + TombstoneRepo + GcRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    ///
    /// `query_timeout_secs` bounds how long a caller waits for the single
    /// pooled connection.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; using a single connection avoids
            // persistent "database is locked" failures under axum concurrency.
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(query_timeout_secs))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::debug!(path = %path.display(), "SQLite metadata store ready");

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use cadence_core::{PlaylistId, SongId};
    use sqlx::Transaction;
    use time::OffsetDateTime;
    use uuid::Uuid;

    /// Rewrite positions as 0..n in their current order.
    async fn renumber_entries(
        tx: &mut Transaction<'_, Sqlite>,
        playlist_id: Uuid,
    ) -> MetadataResult<()> {
        let entries: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT entry_id, position FROM playlist_entries WHERE playlist_id = ? ORDER BY position, entry_id",
        )
        .bind(playlist_id)
        .fetch_all(&mut **tx)
        .await?;

        for (index, (entry_id, position)) in entries.into_iter().enumerate() {
            let index = index as i64;
            if position != index {
                sqlx::query("UPDATE playlist_entries SET position = ? WHERE entry_id = ?")
                    .bind(index)
                    .bind(entry_id)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }

    async fn touch_playlist(
        tx: &mut Transaction<'_, Sqlite>,
        playlist_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE playlists SET updated_at = ? WHERE playlist_id = ?")
            .bind(now)
            .bind(playlist_id)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "playlist {} not found",
                playlist_id
            )));
        }
        Ok(())
    }

    #[async_trait]
    impl SongRepo for SqliteStore {
        async fn create_song(&self, song: &SongRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO songs (
                    song_id, title, artist, title_search, artist_search, duration_ms,
                    blob_key, content_hash, content_length, content_type, artwork,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(song.song_id)
            .bind(&song.title)
            .bind(&song.artist)
            .bind(search_key(&song.title))
            .bind(search_key(&song.artist))
            .bind(song.duration_ms)
            .bind(&song.blob_key)
            .bind(&song.content_hash)
            .bind(song.content_length)
            .bind(&song.content_type)
            .bind(&song.artwork)
            .bind(song.created_at)
            .bind(song.updated_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    Err(MetadataError::AlreadyExists(format!(
                        "song {} or blob key {} already exists",
                        song.song_id, song.blob_key
                    )))
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn get_song(&self, song_id: SongId) -> MetadataResult<Option<SongRow>> {
            let row = sqlx::query_as::<_, SongRow>("SELECT * FROM songs WHERE song_id = ?")
                .bind(*song_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn update_song(
            &self,
            song_id: SongId,
            patch: &SongPatch,
            now: OffsetDateTime,
        ) -> MetadataResult<SongRow> {
            let mut tx = self.pool.begin().await?;

            let mut row = sqlx::query_as::<_, SongRow>("SELECT * FROM songs WHERE song_id = ?")
                .bind(*song_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("song {} not found", song_id)))?;

            patch.apply(&mut row, now);

            sqlx::query(
                "UPDATE songs SET title = ?, artist = ?, title_search = ?, artist_search = ?, duration_ms = ?, artwork = ?, updated_at = ? WHERE song_id = ?",
            )
            .bind(&row.title)
            .bind(&row.artist)
            .bind(search_key(&row.title))
            .bind(search_key(&row.artist))
            .bind(row.duration_ms)
            .bind(&row.artwork)
            .bind(row.updated_at)
            .bind(row.song_id)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(row)
        }

        async fn delete_song(
            &self,
            song_id: SongId,
            now: OffsetDateTime,
        ) -> MetadataResult<SongRow> {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query_as::<_, SongRow>("SELECT * FROM songs WHERE song_id = ?")
                .bind(*song_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("song {} not found", song_id)))?;

            sqlx::query("DELETE FROM songs WHERE song_id = ?")
                .bind(row.song_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                "INSERT INTO blob_tombstones (blob_key, song_id, deleted_at) VALUES (?, ?, ?) ON CONFLICT(blob_key) DO NOTHING",
            )
            .bind(&row.blob_key)
            .bind(row.song_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(row)
        }

        async fn list_songs(&self, query: &SongQuery) -> MetadataResult<Vec<SongRow>> {
            let order_by = query.sort.order_by();
            let rows = match query.like_pattern() {
                Some(pattern) => {
                    let sql = format!(
                        "SELECT * FROM songs WHERE title_search LIKE ? ESCAPE '\\' OR artist_search LIKE ? ESCAPE '\\' ORDER BY {}",
                        order_by
                    );
                    sqlx::query_as::<_, SongRow>(&sql)
                        .bind(&pattern)
                        .bind(&pattern)
                        .fetch_all(&self.pool)
                        .await?
                }
                None => {
                    let sql = format!("SELECT * FROM songs ORDER BY {}", order_by);
                    sqlx::query_as::<_, SongRow>(&sql)
                        .fetch_all(&self.pool)
                        .await?
                }
            };
            Ok(rows)
        }

        async fn blob_key_referenced(&self, blob_key: &str) -> MetadataResult<bool> {
            let referenced: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM songs WHERE blob_key = ?)")
                    .bind(blob_key)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(referenced)
        }
    }

    #[async_trait]
    impl PlaylistRepo for SqliteStore {
        async fn create_playlist(&self, playlist: &PlaylistRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO playlists (playlist_id, name, created_at, updated_at) VALUES (?, ?, ?, ?)",
            )
            .bind(playlist.playlist_id)
            .bind(&playlist.name)
            .bind(playlist.created_at)
            .bind(playlist.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_playlist(
            &self,
            playlist_id: PlaylistId,
        ) -> MetadataResult<Option<PlaylistRow>> {
            let row =
                sqlx::query_as::<_, PlaylistRow>("SELECT * FROM playlists WHERE playlist_id = ?")
                    .bind(*playlist_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn list_playlists(&self) -> MetadataResult<Vec<PlaylistRow>> {
            let rows = sqlx::query_as::<_, PlaylistRow>(
                "SELECT * FROM playlists ORDER BY LOWER(name), created_at",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn rename_playlist(
            &self,
            playlist_id: PlaylistId,
            name: &str,
            now: OffsetDateTime,
        ) -> MetadataResult<PlaylistRow> {
            let row = sqlx::query_as::<_, PlaylistRow>(
                "UPDATE playlists SET name = ?, updated_at = ? WHERE playlist_id = ? RETURNING *",
            )
            .bind(name)
            .bind(now)
            .bind(*playlist_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

            row.ok_or_else(|| MetadataError::NotFound(format!("playlist {} not found", playlist_id)))
        }

        async fn append_playlist_entry(
            &self,
            playlist_id: PlaylistId,
            song_id: SongId,
            now: OffsetDateTime,
        ) -> MetadataResult<PlaylistEntryRow> {
            let playlist_id = *playlist_id.as_uuid();
            let mut tx = self.pool.begin().await?;

            touch_playlist(&mut tx, playlist_id, now).await?;

            let position: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM playlist_entries WHERE playlist_id = ?",
            )
            .bind(playlist_id)
            .fetch_one(&mut *tx)
            .await?;

            let entry = sqlx::query_as::<_, PlaylistEntryRow>(
                r#"
                INSERT INTO playlist_entries (playlist_id, position, song_id, added_at)
                VALUES (?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(playlist_id)
            .bind(position)
            .bind(*song_id.as_uuid())
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(entry)
        }

        async fn remove_playlist_entry(
            &self,
            playlist_id: PlaylistId,
            position: i64,
            now: OffsetDateTime,
        ) -> MetadataResult<()> {
            let playlist_id = *playlist_id.as_uuid();
            let mut tx = self.pool.begin().await?;

            touch_playlist(&mut tx, playlist_id, now).await?;

            let result =
                sqlx::query("DELETE FROM playlist_entries WHERE playlist_id = ? AND position = ?")
                    .bind(playlist_id)
                    .bind(position)
                    .execute(&mut *tx)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "playlist {} has no entry at position {}",
                    playlist_id, position
                )));
            }

            sqlx::query(
                "UPDATE playlist_entries SET position = position - 1 WHERE playlist_id = ? AND position > ?",
            )
            .bind(playlist_id)
            .bind(position)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        }

        async fn get_playlist_entries(
            &self,
            playlist_id: PlaylistId,
        ) -> MetadataResult<Vec<PlaylistEntryRow>> {
            let rows = sqlx::query_as::<_, PlaylistEntryRow>(
                "SELECT * FROM playlist_entries WHERE playlist_id = ? ORDER BY position, entry_id",
            )
            .bind(*playlist_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn remove_dangling_entries(
            &self,
            playlist_id: PlaylistId,
            now: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let playlist_id = *playlist_id.as_uuid();
            let mut tx = self.pool.begin().await?;

            touch_playlist(&mut tx, playlist_id, now).await?;

            let removed = sqlx::query(
                r#"
                DELETE FROM playlist_entries
                WHERE playlist_id = ?
                  AND NOT EXISTS (SELECT 1 FROM songs WHERE songs.song_id = playlist_entries.song_id)
                "#,
            )
            .bind(playlist_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if removed > 0 {
                renumber_entries(&mut tx, playlist_id).await?;
            }

            tx.commit().await?;
            Ok(removed)
        }

        async fn delete_playlist(&self, playlist_id: PlaylistId) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM playlists WHERE playlist_id = ?")
                .bind(*playlist_id.as_uuid())
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "playlist {} not found",
                    playlist_id
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TombstoneRepo for SqliteStore {
        async fn create_blob_tombstone(&self, tombstone: &BlobTombstoneRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO blob_tombstones (blob_key, song_id, deleted_at) VALUES (?, ?, ?) ON CONFLICT(blob_key) DO NOTHING",
            )
            .bind(&tombstone.blob_key)
            .bind(tombstone.song_id)
            .bind(tombstone.deleted_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_pending_blob_tombstones(
            &self,
            limit: u32,
        ) -> MetadataResult<Vec<BlobTombstoneRow>> {
            let rows = sqlx::query_as::<_, BlobTombstoneRow>(
                "SELECT * FROM blob_tombstones ORDER BY deleted_at, blob_key LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_blob_tombstone(&self, blob_key: &str) -> MetadataResult<()> {
            sqlx::query("DELETE FROM blob_tombstones WHERE blob_key = ?")
                .bind(blob_key)
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl GcRepo for SqliteStore {
        async fn create_gc_job(&self, job: &GcJobRow) -> MetadataResult<()> {
            match sqlx::query(
                r#"
                INSERT INTO gc_jobs (gc_job_id, job_type, state, started_at, finished_at, stats_json)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(job.gc_job_id)
            .bind(&job.job_type)
            .bind(&job.state)
            .bind(job.started_at)
            .bind(job.finished_at)
            .bind(&job.stats_json)
            .execute(&self.pool)
            .await
            {
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db_err)) => {
                    // SQLite reports the partial unique index either by column
                    // list or by index name; both mention gc_jobs.
                    let msg = db_err.message();
                    if msg.contains("UNIQUE constraint") && msg.contains("gc_jobs") {
                        Err(MetadataError::Constraint(format!(
                            "another {} job is already active",
                            job.job_type
                        )))
                    } else {
                        Err(sqlx::Error::Database(db_err).into())
                    }
                }
                Err(e) => Err(e.into()),
            }
        }

        async fn get_gc_job(&self, job_id: Uuid) -> MetadataResult<Option<GcJobRow>> {
            let row = sqlx::query_as::<_, GcJobRow>("SELECT * FROM gc_jobs WHERE gc_job_id = ?")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn update_gc_job_state(
            &self,
            job_id: Uuid,
            state: &str,
            finished_at: Option<OffsetDateTime>,
            stats_json: Option<&str>,
        ) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE gc_jobs SET state = ?, finished_at = ?, stats_json = ? WHERE gc_job_id = ?",
            )
            .bind(state)
            .bind(finished_at)
            .bind(stats_json)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_recent_gc_jobs(&self, limit: u32) -> MetadataResult<Vec<GcJobRow>> {
            let rows = sqlx::query_as::<_, GcJobRow>(
                "SELECT * FROM gc_jobs ORDER BY started_at DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_active_gc_jobs(&self, job_type: &str) -> MetadataResult<Vec<GcJobRow>> {
            let rows = sqlx::query_as::<_, GcJobRow>(
                "SELECT * FROM gc_jobs WHERE job_type = ? AND state IN ('queued', 'running') ORDER BY started_at DESC",
            )
            .bind(job_type)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_orphaned_gc_jobs(&self) -> MetadataResult<Vec<GcJobRow>> {
            let rows = sqlx::query_as::<_, GcJobRow>(
                "SELECT * FROM gc_jobs WHERE state IN ('queued', 'running') ORDER BY started_at",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
-- Songs
CREATE TABLE IF NOT EXISTS songs (
    song_id BLOB PRIMARY KEY,
    title TEXT NOT NULL,
    artist TEXT NOT NULL,
    title_search TEXT NOT NULL,
    artist_search TEXT NOT NULL,
    duration_ms INTEGER,
    blob_key TEXT NOT NULL UNIQUE,
    content_hash TEXT NOT NULL,
    content_length INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    artwork TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_songs_created ON songs(created_at);
CREATE INDEX IF NOT EXISTS idx_songs_hash ON songs(content_hash);

-- Playlists
CREATE TABLE IF NOT EXISTS playlists (
    playlist_id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Playlist entries reference songs without a foreign key so deleted songs
-- surface as dangling entries.
CREATE TABLE IF NOT EXISTS playlist_entries (
    entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
    playlist_id BLOB NOT NULL REFERENCES playlists(playlist_id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    song_id BLOB NOT NULL,
    added_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_playlist_entries_position ON playlist_entries(playlist_id, position);
CREATE INDEX IF NOT EXISTS idx_playlist_entries_song ON playlist_entries(song_id);

-- Blobs awaiting deletion after their song was removed
CREATE TABLE IF NOT EXISTS blob_tombstones (
    blob_key TEXT PRIMARY KEY,
    song_id BLOB NOT NULL,
    deleted_at TEXT NOT NULL
);

-- Reconciliation jobs
CREATE TABLE IF NOT EXISTS gc_jobs (
    gc_job_id BLOB PRIMARY KEY,
    job_type TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'queued',
    started_at TEXT,
    finished_at TEXT,
    stats_json TEXT
);
CREATE INDEX IF NOT EXISTS idx_gc_jobs_state ON gc_jobs(state);
-- At most one queued or running job per type
CREATE UNIQUE INDEX IF NOT EXISTS idx_gc_jobs_type_active
ON gc_jobs(job_type)
WHERE state IN ('queued', 'running');
"#;
