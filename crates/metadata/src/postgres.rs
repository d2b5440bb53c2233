//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{GcRepo, PlaylistRepo, SongRepo, TombstoneRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use cadence_core::config::PgSslMode;
use cadence_core::{PlaylistId, SongId};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres, Transaction};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, e.g. the password
    /// through `CADENCE_METADATA__PASSWORD`.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Shorthand for [`PostgresStore::from_url`].
    pub async fn new(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        Self::from_url(url, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Lock the playlist row and bump `updated_at`; `NotFound` if it is missing.
async fn lock_playlist(
    tx: &mut Transaction<'_, Postgres>,
    playlist_id: Uuid,
    now: OffsetDateTime,
) -> MetadataResult<()> {
    let locked: Option<Uuid> = sqlx::query_scalar(
        "SELECT playlist_id FROM playlists WHERE playlist_id = $1 FOR UPDATE",
    )
    .bind(playlist_id)
    .fetch_optional(&mut **tx)
    .await?;
    if locked.is_none() {
        return Err(MetadataError::NotFound(format!(
            "playlist {} not found",
            playlist_id
        )));
    }

    sqlx::query("UPDATE playlists SET updated_at = $1 WHERE playlist_id = $2")
        .bind(now)
        .bind(playlist_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl SongRepo for PostgresStore {
    async fn create_song(&self, song: &SongRow) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO songs (
                song_id, title, artist, title_search, artist_search, duration_ms,
                blob_key, content_hash, content_length, content_type, artwork,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
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
            // PostgreSQL error code 23505 = unique_violation
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                Err(MetadataError::AlreadyExists(format!(
                    "song {} or blob key {} already exists",
                    song.song_id, song.blob_key
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_song(&self, song_id: SongId) -> MetadataResult<Option<SongRow>> {
        let row = sqlx::query_as::<_, SongRow>("SELECT * FROM songs WHERE song_id = $1")
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

        let mut row =
            sqlx::query_as::<_, SongRow>("SELECT * FROM songs WHERE song_id = $1 FOR UPDATE")
                .bind(*song_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("song {} not found", song_id)))?;

        patch.apply(&mut row, now);

        sqlx::query(
            "UPDATE songs SET title = $1, artist = $2, title_search = $3, artist_search = $4, duration_ms = $5, artwork = $6, updated_at = $7 WHERE song_id = $8",
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

    async fn delete_song(&self, song_id: SongId, now: OffsetDateTime) -> MetadataResult<SongRow> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, SongRow>("DELETE FROM songs WHERE song_id = $1 RETURNING *")
            .bind(*song_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("song {} not found", song_id)))?;

        sqlx::query(
            "INSERT INTO blob_tombstones (blob_key, song_id, deleted_at) VALUES ($1, $2, $3) ON CONFLICT (blob_key) DO NOTHING",
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
                    "SELECT * FROM songs WHERE title_search LIKE $1 ESCAPE '\\' OR artist_search LIKE $1 ESCAPE '\\' ORDER BY {}",
                    order_by
                );
                sqlx::query_as::<_, SongRow>(&sql)
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
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM songs WHERE blob_key = $1)")
                .bind(blob_key)
                .fetch_one(&self.pool)
                .await?;
        Ok(referenced)
    }
}

#[async_trait]
impl PlaylistRepo for PostgresStore {
    async fn create_playlist(&self, playlist: &PlaylistRow) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO playlists (playlist_id, name, created_at, updated_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(playlist.playlist_id)
        .bind(&playlist.name)
        .bind(playlist.created_at)
        .bind(playlist.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_playlist(&self, playlist_id: PlaylistId) -> MetadataResult<Option<PlaylistRow>> {
        let row = sqlx::query_as::<_, PlaylistRow>("SELECT * FROM playlists WHERE playlist_id = $1")
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
            "UPDATE playlists SET name = $1, updated_at = $2 WHERE playlist_id = $3 RETURNING *",
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

        // The row lock serialises concurrent appends to the same playlist.
        lock_playlist(&mut tx, playlist_id, now).await?;

        let position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM playlist_entries WHERE playlist_id = $1",
        )
        .bind(playlist_id)
        .fetch_one(&mut *tx)
        .await?;

        let entry = sqlx::query_as::<_, PlaylistEntryRow>(
            r#"
            INSERT INTO playlist_entries (playlist_id, position, song_id, added_at)
            VALUES ($1, $2, $3, $4)
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

        lock_playlist(&mut tx, playlist_id, now).await?;

        let result =
            sqlx::query("DELETE FROM playlist_entries WHERE playlist_id = $1 AND position = $2")
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
            "UPDATE playlist_entries SET position = position - 1 WHERE playlist_id = $1 AND position > $2",
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
            "SELECT * FROM playlist_entries WHERE playlist_id = $1 ORDER BY position, entry_id",
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

        lock_playlist(&mut tx, playlist_id, now).await?;

        let removed = sqlx::query(
            r#"
            DELETE FROM playlist_entries
            WHERE playlist_id = $1
              AND NOT EXISTS (SELECT 1 FROM songs WHERE songs.song_id = playlist_entries.song_id)
            "#,
        )
        .bind(playlist_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed > 0 {
            // The subquery sees the pre-update snapshot, so ranks are stable.
            sqlx::query(
                r#"
                UPDATE playlist_entries AS e
                SET position = ranked.new_position
                FROM (
                    SELECT entry_id, ROW_NUMBER() OVER (ORDER BY position, entry_id) - 1 AS new_position
                    FROM playlist_entries
                    WHERE playlist_id = $1
                ) AS ranked
                WHERE e.entry_id = ranked.entry_id AND e.position <> ranked.new_position
                "#,
            )
            .bind(playlist_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    async fn delete_playlist(&self, playlist_id: PlaylistId) -> MetadataResult<()> {
        let result = sqlx::query("DELETE FROM playlists WHERE playlist_id = $1")
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
impl TombstoneRepo for PostgresStore {
    async fn create_blob_tombstone(&self, tombstone: &BlobTombstoneRow) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO blob_tombstones (blob_key, song_id, deleted_at) VALUES ($1, $2, $3) ON CONFLICT (blob_key) DO NOTHING",
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
            "SELECT * FROM blob_tombstones ORDER BY deleted_at, blob_key LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_blob_tombstone(&self, blob_key: &str) -> MetadataResult<()> {
        sqlx::query("DELETE FROM blob_tombstones WHERE blob_key = $1")
            .bind(blob_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl GcRepo for PostgresStore {
    async fn create_gc_job(&self, job: &GcJobRow) -> MetadataResult<()> {
        match sqlx::query(
            r#"
            INSERT INTO gc_jobs (gc_job_id, job_type, state, started_at, finished_at, stats_json)
            VALUES ($1, $2, $3, $4, $5, $6)
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
                let is_unique = db_err.code().as_deref() == Some("23505");
                let is_gc_constraint = db_err.constraint() == Some("idx_gc_jobs_type_active");

                if is_unique && is_gc_constraint {
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

    async fn get_gc_job(&self, gc_job_id: Uuid) -> MetadataResult<Option<GcJobRow>> {
        let row = sqlx::query_as::<_, GcJobRow>("SELECT * FROM gc_jobs WHERE gc_job_id = $1")
            .bind(gc_job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update_gc_job_state(
        &self,
        gc_job_id: Uuid,
        state: &str,
        finished_at: Option<OffsetDateTime>,
        stats_json: Option<&str>,
    ) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE gc_jobs SET state = $1, finished_at = $2, stats_json = $3 WHERE gc_job_id = $4",
        )
        .bind(state)
        .bind(finished_at)
        .bind(stats_json)
        .bind(gc_job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_recent_gc_jobs(&self, limit: u32) -> MetadataResult<Vec<GcJobRow>> {
        let rows = sqlx::query_as::<_, GcJobRow>(
            "SELECT * FROM gc_jobs ORDER BY started_at DESC NULLS LAST LIMIT $1",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_active_gc_jobs(&self, job_type: &str) -> MetadataResult<Vec<GcJobRow>> {
        let rows = sqlx::query_as::<_, GcJobRow>(
            "SELECT * FROM gc_jobs WHERE job_type = $1 AND state IN ('queued', 'running') ORDER BY started_at DESC",
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
