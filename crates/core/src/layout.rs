//! Object key layout used by the blob store.
//!
//! ```text
//! staging/<uuid>                          in-flight ingestion
//! audio/<hh>/<hh>/<sha256>-<unix_nanos>   committed song blob
//! ```

use crate::hash::ContentHash;
use time::OffsetDateTime;
use uuid::Uuid;

/// Prefix for blobs still being received.
pub const STAGING_PREFIX: &str = "staging/";

/// Prefix for committed song blobs.
pub const AUDIO_PREFIX: &str = "audio/";

/// Key for a fresh staging upload.
pub fn staging_key(upload: Uuid) -> String {
    format!("{STAGING_PREFIX}{upload}")
}

/// Key for a committed blob.
///
/// The content hash alone is not unique enough: the same audio may be
/// uploaded again, so the commit time is appended as a disambiguator.
pub fn audio_key(hash: &ContentHash, committed_at: OffsetDateTime) -> String {
    let hex = hash.to_hex();
    format!(
        "{AUDIO_PREFIX}{}/{}/{}-{}",
        &hex[..2],
        &hex[2..4],
        hex,
        committed_at.unix_timestamp_nanos()
    )
}

/// Whether a key belongs to either managed prefix.
pub fn is_managed_key(key: &str) -> bool {
    key.starts_with(STAGING_PREFIX) || key.starts_with(AUDIO_PREFIX)
}
