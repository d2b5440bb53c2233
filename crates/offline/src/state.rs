//! Entry lifecycle.

use serde::{Deserialize, Serialize};

/// Where one song is in the offline lifecycle.
///
/// ```text
/// Absent -> Fetching -> Cached -> Stale -> Refreshing -> Cached
///              |          |         |          |
///              v          v         v          v
///           Absent     Evicted   Evicted     Stale (refresh failed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Absent,
    Fetching,
    Cached,
    /// The server holds a newer version; the old bytes are still served.
    Stale,
    Refreshing,
    Evicted,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Fetching => "fetching",
            Self::Cached => "cached",
            Self::Stale => "stale",
            Self::Refreshing => "refreshing",
            Self::Evicted => "evicted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "absent" => Some(Self::Absent),
            "fetching" => Some(Self::Fetching),
            "cached" => Some(Self::Cached),
            "stale" => Some(Self::Stale),
            "refreshing" => Some(Self::Refreshing),
            "evicted" => Some(Self::Evicted),
            _ => None,
        }
    }

    /// Whether the payload file is present and readable.
    pub fn is_resident(&self) -> bool {
        matches!(self, Self::Cached | Self::Stale | Self::Refreshing)
    }

    /// Whether eviction may pick this entry (pins aside).
    pub fn is_evictable(&self) -> bool {
        matches!(self, Self::Cached | Self::Stale)
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
