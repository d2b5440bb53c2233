//! Database models mapping to the metadata schema.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Songs
// =============================================================================

/// Song record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SongRow {
    pub song_id: Uuid,
    pub title: String,
    pub artist: String,
    pub duration_ms: Option<i64>,
    pub blob_key: String,
    /// SHA-256 of the audio bytes, lowercase hex.
    pub content_hash: String,
    pub content_length: i64,
    pub content_type: String,
    pub artwork: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Partial update of a song's descriptive fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongPatch {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub duration_ms: Option<i64>,
    pub artwork: Option<String>,
}

impl SongPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.duration_ms.is_none()
            && self.artwork.is_none()
    }

    /// Apply this patch to a row in memory.
    pub fn apply(&self, row: &mut SongRow, now: OffsetDateTime) {
        if let Some(title) = &self.title {
            row.title = title.clone();
        }
        if let Some(artist) = &self.artist {
            row.artist = artist.clone();
        }
        if let Some(duration_ms) = self.duration_ms {
            row.duration_ms = Some(duration_ms);
        }
        if let Some(artwork) = &self.artwork {
            row.artwork = Some(artwork.clone());
        }
        row.updated_at = now;
    }
}

/// Catalog ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Newest first.
    #[default]
    CreatedDesc,
    /// Title ascending, case-insensitive.
    TitleAsc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreatedDesc => "created_desc",
            Self::TitleAsc => "title_asc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created_desc" => Some(Self::CreatedDesc),
            "title_asc" => Some(Self::TitleAsc),
            _ => None,
        }
    }

    /// ORDER BY clause shared by both backends.
    pub(crate) fn order_by(&self) -> &'static str {
        match self {
            Self::CreatedDesc => "created_at DESC, song_id DESC",
            Self::TitleAsc => "title_search ASC, artist_search ASC, created_at ASC",
        }
    }
}

/// Folded form of a title or artist, stored beside it for filtering and
/// sorting. SQLite's `LOWER()` only folds ASCII, so folding happens here.
pub(crate) fn search_key(s: &str) -> String {
    s.to_lowercase()
}

/// Catalog listing query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongQuery {
    /// Case-insensitive substring matched against title and artist.
    pub filter: Option<String>,
    pub sort: SortOrder,
}

impl SongQuery {
    /// LIKE pattern for the filter, with `%`, `_` and `\` escaped.
    /// Blank filters match everything and yield `None`.
    pub(crate) fn like_pattern(&self) -> Option<String> {
        let filter = self.filter.as_deref()?.trim();
        if filter.is_empty() {
            return None;
        }

        let mut pattern = String::with_capacity(filter.len() + 2);
        pattern.push('%');
        for c in search_key(filter).chars() {
            if matches!(c, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        Some(pattern)
    }
}

// =============================================================================
// Playlists
// =============================================================================

/// Playlist record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PlaylistRow {
    pub playlist_id: Uuid,
    pub name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// One position in a playlist. `song_id` carries no foreign key, so it may
/// outlive the song it names.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PlaylistEntryRow {
    pub entry_id: i64,
    pub playlist_id: Uuid,
    pub position: i64,
    pub song_id: Uuid,
    pub added_at: OffsetDateTime,
}

// =============================================================================
// Blob tombstones
// =============================================================================

/// A blob whose song record is gone but whose bytes may still be stored.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct BlobTombstoneRow {
    pub blob_key: String,
    pub song_id: Uuid,
    pub deleted_at: OffsetDateTime,
}

// =============================================================================
// Reconciliation jobs
// =============================================================================

/// GC job record.
#[derive(Debug, Clone, FromRow)]
pub struct GcJobRow {
    pub gc_job_id: Uuid,
    pub job_type: String,
    pub state: String,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
    pub stats_json: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        let query = SongQuery {
            filter: Some("100%_Pure\\".to_string()),
            sort: SortOrder::default(),
        };
        assert_eq!(query.like_pattern().as_deref(), Some("%100\\%\\_pure\\\\%"));
    }

    #[test]
    fn test_search_key_folds_non_ascii() {
        assert_eq!(search_key("Été Indien"), "été indien");
        assert_eq!(search_key("BJÖRK"), "björk");

        let query = SongQuery {
            filter: Some("ÉTÉ".to_string()),
            sort: SortOrder::default(),
        };
        assert_eq!(query.like_pattern().as_deref(), Some("%été%"));
    }

    #[test]
    fn test_blank_filter_is_absent() {
        let query = SongQuery {
            filter: Some("   ".to_string()),
            sort: SortOrder::TitleAsc,
        };
        assert_eq!(query.like_pattern(), None);
        assert_eq!(SongQuery::default().like_pattern(), None);
    }

    #[test]
    fn test_sort_order_parse() {
        assert_eq!(SortOrder::parse("title_asc"), Some(SortOrder::TitleAsc));
        assert_eq!(SortOrder::parse("created_desc"), Some(SortOrder::CreatedDesc));
        assert_eq!(SortOrder::parse("random"), None);
        assert_eq!(SortOrder::default(), SortOrder::CreatedDesc);
    }

    #[test]
    fn test_patch_apply() {
        let now = OffsetDateTime::now_utc();
        let mut row = SongRow {
            song_id: Uuid::new_v4(),
            title: "Untitled".into(),
            artist: "Unknown Artist".into(),
            duration_ms: None,
            blob_key: "audio/aa/bb/x".into(),
            content_hash: "00".repeat(32),
            content_length: 10,
            content_type: "audio/mpeg".into(),
            artwork: None,
            created_at: now,
            updated_at: now,
        };
        let later = now + time::Duration::seconds(5);
        SongPatch {
            title: Some("Blue".into()),
            duration_ms: Some(1000),
            ..Default::default()
        }
        .apply(&mut row, later);

        assert_eq!(row.title, "Blue");
        assert_eq!(row.artist, "Unknown Artist");
        assert_eq!(row.duration_ms, Some(1000));
        assert_eq!(row.updated_at, later);
    }
}
