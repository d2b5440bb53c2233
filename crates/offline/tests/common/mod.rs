//! In-memory server for offline cache tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use cadence_core::{ContentHash, SongId};
use cadence_offline::{AudioStream, RemoteError, RemoteLibrary, SongSnapshot};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

pub const MB: u64 = 1_000_000;

const CHUNK_SIZE: usize = 64 * 1024;

/// Deterministic payload of `len` bytes.
pub fn payload(seed: u8, len: u64) -> Bytes {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect::<Vec<u8>>()
        .into()
}

#[derive(Default)]
pub struct FakeRemote {
    songs: Mutex<HashMap<SongId, (SongSnapshot, Bytes)>>,
    /// `fetch_audio` fails.
    pub fail_audio: AtomicBool,
    /// `fetch_audio` flips the first byte of the payload.
    pub corrupt_audio: AtomicBool,
    /// `fetch_audio` returns a stream that never ends.
    pub hang_audio: AtomicBool,
    pub fail_catalog: AtomicBool,
    pub audio_fetches: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_song(&self, title: &str, data: Bytes) -> SongSnapshot {
        let now = OffsetDateTime::now_utc();
        let snapshot = SongSnapshot {
            id: SongId::new(),
            title: title.to_string(),
            artist: "Test Artist".to_string(),
            duration_ms: None,
            content_type: "audio/mpeg".to_string(),
            content_length: data.len() as u64,
            content_hash: ContentHash::compute(&data).to_hex(),
            artwork: None,
            created_at: now,
            updated_at: now,
        };
        self.songs
            .lock()
            .unwrap()
            .insert(snapshot.id, (snapshot.clone(), data));
        snapshot
    }

    pub fn rename(&self, id: SongId, title: &str) {
        let mut songs = self.songs.lock().unwrap();
        let (snapshot, _) = songs.get_mut(&id).unwrap();
        snapshot.title = title.to_string();
        snapshot.updated_at += time::Duration::seconds(1);
    }

    pub fn replace_audio(&self, id: SongId, data: Bytes) {
        let mut songs = self.songs.lock().unwrap();
        let (snapshot, bytes) = songs.get_mut(&id).unwrap();
        snapshot.content_length = data.len() as u64;
        snapshot.content_hash = ContentHash::compute(&data).to_hex();
        snapshot.updated_at += time::Duration::seconds(1);
        *bytes = data;
    }

    pub fn delete(&self, id: SongId) {
        self.songs.lock().unwrap().remove(&id);
    }

    pub fn audio_fetches(&self) -> usize {
        self.audio_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteLibrary for FakeRemote {
    async fn fetch_song(&self, id: SongId) -> Result<SongSnapshot, RemoteError> {
        self.songs
            .lock()
            .unwrap()
            .get(&id)
            .map(|(snapshot, _)| snapshot.clone())
            .ok_or(RemoteError::NotFound(id))
    }

    async fn fetch_audio(&self, id: SongId) -> Result<AudioStream, RemoteError> {
        self.audio_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_audio.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("connection refused".into()));
        }
        let data = self
            .songs
            .lock()
            .unwrap()
            .get(&id)
            .map(|(_, data)| data.clone())
            .ok_or(RemoteError::NotFound(id))?;

        if self.hang_audio.load(Ordering::SeqCst) {
            let first = Bytes::copy_from_slice(&data[..1]);
            let stream = futures::stream::iter(vec![Ok(first)]).chain(futures::stream::pending());
            return Ok(Box::pin(stream));
        }

        let mut data = data.to_vec();
        if self.corrupt_audio.load(Ordering::SeqCst) && !data.is_empty() {
            data[0] ^= 0xff;
        }
        let chunks: Vec<Result<Bytes, RemoteError>> = data
            .chunks(CHUNK_SIZE)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn list_catalog(&self) -> Result<Vec<SongSnapshot>, RemoteError> {
        if self.fail_catalog.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("catalog unavailable".into()));
        }
        Ok(self
            .songs
            .lock()
            .unwrap()
            .values()
            .map(|(snapshot, _)| snapshot.clone())
            .collect())
    }
}
