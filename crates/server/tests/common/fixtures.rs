//! Test fixtures for generating test data.

use bytes::Bytes;
use cadence_metadata::models::SongRow;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Compute SHA-256 hash of data as hex string.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn sha256_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    result.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Split data into chunks of specified size.
#[allow(dead_code)]
pub fn split_into_chunks(data: &[u8], chunk_size: usize) -> Vec<Bytes> {
    data.chunks(chunk_size)
        .map(|c| Bytes::copy_from_slice(c))
        .collect()
}

/// A song row pointing at `blob_key`, with the given title and creation time.
#[allow(dead_code)]
pub fn song_row(title: &str, artist: &str, blob_key: &str, created_at: OffsetDateTime) -> SongRow {
    SongRow {
        song_id: Uuid::new_v4(),
        title: title.to_string(),
        artist: artist.to_string(),
        duration_ms: None,
        blob_key: blob_key.to_string(),
        content_hash: sha256_hash(blob_key.as_bytes()),
        content_length: 1024,
        content_type: "audio/mpeg".to_string(),
        artwork: None,
        created_at,
        updated_at: created_at,
    }
}
