//! Reservations and read pins that hold entries against eviction.

use cadence_core::SongId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Pin counts for one song. Explicit reservations and in-flight reads are
/// tracked apart so releasing a reservation can never drop a reader's pin.
#[derive(Debug, Default, Clone, Copy)]
struct PinCounts {
    readers: usize,
    reserved: usize,
}

impl PinCounts {
    fn is_empty(&self) -> bool {
        self.readers == 0 && self.reserved == 0
    }
}

/// Counted pins per song.
///
/// Guarded by a synchronous mutex so a [`CacheReadGuard`] can release its pin
/// from `Drop`.
#[derive(Debug, Default)]
pub(crate) struct Pins {
    counts: Mutex<HashMap<SongId, PinCounts>>,
}

impl Pins {
    fn counts(&self) -> MutexGuard<'_, HashMap<SongId, PinCounts>> {
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn acquire_read(&self, song_id: SongId) {
        self.counts().entry(song_id).or_default().readers += 1;
    }

    fn release_read(&self, song_id: SongId) {
        let mut counts = self.counts();
        if let Some(pin) = counts.get_mut(&song_id) {
            pin.readers = pin.readers.saturating_sub(1);
            if pin.is_empty() {
                counts.remove(&song_id);
            }
        }
    }

    pub fn reserve(&self, song_id: SongId) {
        self.counts().entry(song_id).or_default().reserved += 1;
    }

    /// Drop one reservation. Returns false when the song held none, even if
    /// reads are in progress.
    pub fn unreserve(&self, song_id: SongId) -> bool {
        let mut counts = self.counts();
        match counts.get_mut(&song_id) {
            Some(pin) if pin.reserved > 0 => {
                pin.reserved -= 1;
                if pin.is_empty() {
                    counts.remove(&song_id);
                }
                true
            }
            _ => false,
        }
    }

    pub fn is_pinned(&self, song_id: SongId) -> bool {
        self.counts().contains_key(&song_id)
    }
}

/// Keeps a cached entry pinned while a read is in progress.
///
/// The pin is released when the guard is dropped.
#[derive(Debug)]
pub struct CacheReadGuard {
    pins: Arc<Pins>,
    song_id: SongId,
}

impl CacheReadGuard {
    pub(crate) fn new(pins: Arc<Pins>, song_id: SongId) -> Self {
        pins.acquire_read(song_id);
        Self { pins, song_id }
    }

    pub fn song_id(&self) -> SongId {
        self.song_id
    }
}

impl Drop for CacheReadGuard {
    fn drop(&mut self) {
        self.pins.release_read(self.song_id);
    }
}
