//! Persistent index of cached entries.
//!
//! One SQLite row per song the cache knows about. Payload bytes live next to
//! the index under `blobs/`; the row records what the payload is and when it
//! was last read.

use crate::error::CacheResult;
use crate::remote::SongSnapshot;
use crate::state::EntryState;
use cadence_core::SongId;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// A row of the `cache_entries` table.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct EntryRow {
    pub song_id: Uuid,
    pub state: String,
    pub size: i64,
    pub snapshot_json: String,
    pub fetched_at: OffsetDateTime,
    pub last_access_at: OffsetDateTime,
    pub server_updated_at: OffsetDateTime,
}

impl EntryRow {
    pub fn new(
        snapshot: &SongSnapshot,
        state: EntryState,
        size: u64,
        fetched_at: OffsetDateTime,
        last_access_at: OffsetDateTime,
    ) -> CacheResult<Self> {
        Ok(Self {
            song_id: *snapshot.id.as_uuid(),
            state: state.as_str().to_string(),
            size: size as i64,
            snapshot_json: serde_json::to_string(snapshot)?,
            fetched_at,
            last_access_at,
            server_updated_at: snapshot.updated_at,
        })
    }

    pub fn snapshot(&self) -> CacheResult<SongSnapshot> {
        Ok(serde_json::from_str(&self.snapshot_json)?)
    }
}

/// SQLite-backed entry index.
pub(crate) struct CacheIndex {
    pool: Pool<Sqlite>,
}

impl CacheIndex {
    pub async fn open(path: &Path) -> CacheResult<Self> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn load_all(&self) -> CacheResult<Vec<EntryRow>> {
        let rows = sqlx::query_as::<_, EntryRow>(
            "SELECT * FROM cache_entries ORDER BY last_access_at, song_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn upsert(&self, row: &EntryRow) -> CacheResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cache_entries (
                song_id, state, size, snapshot_json, fetched_at, last_access_at, server_updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(song_id) DO UPDATE SET
                state = excluded.state,
                size = excluded.size,
                snapshot_json = excluded.snapshot_json,
                fetched_at = excluded.fetched_at,
                last_access_at = excluded.last_access_at,
                server_updated_at = excluded.server_updated_at
            "#,
        )
        .bind(row.song_id)
        .bind(&row.state)
        .bind(row.size)
        .bind(&row.snapshot_json)
        .bind(row.fetched_at)
        .bind(row.last_access_at)
        .bind(row.server_updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_state(&self, song_id: SongId, state: EntryState) -> CacheResult<()> {
        sqlx::query("UPDATE cache_entries SET state = ? WHERE song_id = ?")
            .bind(state.as_str())
            .bind(*song_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn touch(&self, song_id: SongId, at: OffsetDateTime) -> CacheResult<()> {
        sqlx::query("UPDATE cache_entries SET last_access_at = ? WHERE song_id = ?")
            .bind(at)
            .bind(*song_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn delete(&self, song_id: SongId) -> CacheResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE song_id = ?")
            .bind(*song_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    song_id BLOB PRIMARY KEY,
    state TEXT NOT NULL,
    size INTEGER NOT NULL,
    snapshot_json TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    last_access_at TEXT NOT NULL,
    server_updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_entries_access ON cache_entries(last_access_at);
"#;
