//! The offline cache manager.
//!
//! Entries move through `Absent -> Fetching -> Cached -> Stale -> Refreshing`
//! and leave through eviction. Payload bytes are written to `tmp/`, verified
//! against the server's size and hash, then renamed into `blobs/<song_id>`.
//!
//! Resident bytes never exceed the configured capacity. Making room evicts
//! unpinned entries least-recently-accessed first; entries held by a reader
//! or an explicit reservation are skipped.

use crate::error::{CacheError, CacheResult};
use crate::index::{CacheIndex, EntryRow};
use crate::pins::{CacheReadGuard, Pins};
use crate::remote::{RemoteError, RemoteLibrary, SongSnapshot};
use crate::state::EntryState;
use bytes::Bytes;
use cadence_core::{ContentHash, SongId};
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

const BLOBS_DIR: &str = "blobs";
const TMP_DIR: &str = "tmp";
const INDEX_FILE: &str = "index.db";

/// Result of [`OfflineCache::get`].
#[derive(Debug)]
pub enum CacheLookup {
    Hit(CachedSong),
    MustFetchFromNetwork,
}

/// A cached song, pinned until this value is dropped.
#[derive(Debug)]
pub struct CachedSong {
    pub snapshot: SongSnapshot,
    pub path: PathBuf,
    /// The server holds a newer version than these bytes.
    pub stale: bool,
    guard: CacheReadGuard,
}

impl CachedSong {
    /// Read the whole payload.
    pub async fn read(&self) -> CacheResult<Bytes> {
        Ok(Bytes::from(tokio::fs::read(&self.path).await?))
    }

    pub fn song_id(&self) -> SongId {
        self.guard.song_id()
    }
}

/// Snapshot of the cache contents.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub capacity: u64,
    pub used: u64,
    /// Most recently accessed first.
    pub entries: Vec<EntryStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryStatus {
    pub song_id: SongId,
    pub title: String,
    pub artist: String,
    pub state: EntryState,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_access_at: OffsetDateTime,
    pub pinned: bool,
}

/// Outcome of one staleness pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: u64,
    pub marked_stale: u64,
    pub refreshed: u64,
    pub evicted: u64,
    pub failed: u64,
}

#[derive(Debug)]
struct Entry {
    state: EntryState,
    size: u64,
    snapshot: SongSnapshot,
    fetched_at: OffsetDateTime,
    last_access_at: OffsetDateTime,
    /// Access order; lower is older.
    seq: u64,
}

impl Entry {
    fn row(&self) -> CacheResult<EntryRow> {
        EntryRow::new(
            &self.snapshot,
            self.state,
            self.size,
            self.fetched_at,
            self.last_access_at,
        )
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<SongId, Entry>,
    /// Sum of resident entry sizes.
    used: u64,
    next_seq: u64,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

struct Shared {
    dir: PathBuf,
    capacity: u64,
    remote: Arc<dyn RemoteLibrary>,
    index: CacheIndex,
    inner: Mutex<Inner>,
    pins: Arc<Pins>,
    /// Songs with a save or an eviction in flight, with the state reported
    /// for them. They have no entry.
    in_flight: StdMutex<HashMap<SongId, EntryState>>,
    refresh_on_access: AtomicBool,
}

impl Shared {
    fn in_flight(&self) -> StdMutexGuard<'_, HashMap<SongId, EntryState>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Marks a song without an entry as busy until dropped, so a cancelled save
/// or eviction does not leave the song stuck.
struct InFlight<'a> {
    shared: &'a Shared,
    song_id: SongId,
}

impl<'a> InFlight<'a> {
    fn claim(shared: &'a Shared, song_id: SongId, state: EntryState) -> Option<Self> {
        let mut in_flight = shared.in_flight();
        if in_flight.contains_key(&song_id) {
            return None;
        }
        in_flight.insert(song_id, state);
        Some(Self { shared, song_id })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.in_flight().remove(&self.song_id);
    }
}

/// Puts a `Refreshing` entry back to `Stale` if the refresh is dropped
/// before it settles.
struct RefreshGuard {
    cache: Option<OfflineCache>,
    song_id: SongId,
}

impl RefreshGuard {
    fn new(cache: &OfflineCache, song_id: SongId) -> Self {
        Self {
            cache: Some(cache.clone()),
            song_id,
        }
    }

    fn disarm(mut self) {
        self.cache = None;
    }

    async fn restore(mut self) {
        if let Some(cache) = &self.cache {
            cache.restore_stale(self.song_id).await;
        }
        self.cache = None;
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        let Some(cache) = self.cache.take() else {
            return;
        };
        let song_id = self.song_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tracing::info!(song_id = %song_id, "Refresh abandoned, entry back to stale");
                    cache.restore_stale(song_id).await;
                });
            }
            // Reopening the cache loads `Refreshing` rows as `Stale`.
            Err(_) => {
                tracing::warn!(song_id = %song_id, "Refresh abandoned outside a runtime");
            }
        }
    }
}

/// Persistent, capacity-bounded mirror of server songs.
#[derive(Clone)]
pub struct OfflineCache {
    shared: Arc<Shared>,
}

impl OfflineCache {
    /// Open (or create) a cache rooted at `dir`.
    ///
    /// Rows for interrupted fetches and rows whose payload file is missing
    /// are dropped; interrupted refreshes fall back to `Stale`. Payload files
    /// without a row are deleted. If `capacity_bytes` shrank since the last
    /// run, the oldest entries are evicted until the rest fits.
    pub async fn open(
        dir: impl AsRef<Path>,
        capacity_bytes: u64,
        remote: Arc<dyn RemoteLibrary>,
    ) -> CacheResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        let blobs = dir.join(BLOBS_DIR);
        let tmp = dir.join(TMP_DIR);

        tokio::fs::create_dir_all(&blobs).await?;
        // Partial downloads never survive a restart.
        if tokio::fs::try_exists(&tmp).await? {
            tokio::fs::remove_dir_all(&tmp).await?;
        }
        tokio::fs::create_dir_all(&tmp).await?;

        let index = CacheIndex::open(&dir.join(INDEX_FILE)).await?;
        let mut inner = Inner::default();

        // Rows arrive oldest access first, which seeds the LRU order.
        for row in index.load_all().await? {
            let song_id = SongId::from_uuid(row.song_id);
            let path = blobs.join(song_id.to_string());
            let recorded = EntryState::parse(&row.state);
            let state = match recorded {
                Some(EntryState::Cached) => Some(EntryState::Cached),
                Some(EntryState::Stale | EntryState::Refreshing) => Some(EntryState::Stale),
                _ => None,
            };
            let on_disk = file_len(&path).await?;

            match (state, row.snapshot().ok(), on_disk) {
                (Some(state), Some(snapshot), Some(len)) if len == row.size as u64 => {
                    if recorded != Some(state) {
                        index.set_state(song_id, state).await?;
                    }
                    let seq = inner.next_seq();
                    inner.used += len;
                    inner.entries.insert(
                        song_id,
                        Entry {
                            state,
                            size: len,
                            snapshot,
                            fetched_at: row.fetched_at,
                            last_access_at: row.last_access_at,
                            seq,
                        },
                    );
                }
                _ => {
                    tracing::info!(
                        song_id = %song_id,
                        state = %row.state,
                        "Dropping unusable offline entry"
                    );
                    index.delete(song_id).await?;
                    remove_file_if_exists(&path).await?;
                }
            }
        }

        let mut listing = tokio::fs::read_dir(&blobs).await?;
        while let Some(file) = listing.next_entry().await? {
            let known = file
                .file_name()
                .to_str()
                .and_then(|name| SongId::parse(name).ok())
                .is_some_and(|id| inner.entries.contains_key(&id));
            if !known {
                tracing::debug!(path = %file.path().display(), "Removing orphaned offline payload");
                remove_file_if_exists(&file.path()).await?;
            }
        }

        let cache = Self {
            shared: Arc::new(Shared {
                dir,
                capacity: capacity_bytes,
                remote,
                index,
                inner: Mutex::new(inner),
                pins: Arc::new(Pins::default()),
                in_flight: StdMutex::new(HashMap::new()),
                refresh_on_access: AtomicBool::new(true),
            }),
        };

        {
            let mut inner = cache.shared.inner.lock().await;
            let victims = cache.plan_eviction(&inner, 0, None)?;
            cache.evict_locked(&mut inner, &victims).await?;
            tracing::debug!(
                dir = %cache.shared.dir.display(),
                entries = inner.entries.len(),
                used = inner.used,
                capacity = capacity_bytes,
                "Offline cache ready"
            );
        }

        Ok(cache)
    }

    /// Whether a hit on a stale entry starts a background refresh. On by default.
    pub fn with_refresh_on_access(self, enabled: bool) -> Self {
        self.shared
            .refresh_on_access
            .store(enabled, Ordering::Relaxed);
        self
    }

    pub fn capacity(&self) -> u64 {
        self.shared.capacity
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// Look up a song. A hit is pinned until the returned [`CachedSong`] is dropped.
    pub async fn get(&self, song_id: SongId) -> CacheResult<CacheLookup> {
        let mut inner = self.shared.inner.lock().await;
        let servable = inner
            .entries
            .get(&song_id)
            .is_some_and(|entry| entry.state.is_resident());
        if !servable {
            return Ok(CacheLookup::MustFetchFromNetwork);
        }

        let seq = inner.next_seq();
        let now = OffsetDateTime::now_utc();
        let Some(entry) = inner.entries.get_mut(&song_id) else {
            return Ok(CacheLookup::MustFetchFromNetwork);
        };
        entry.seq = seq;
        entry.last_access_at = now;
        let stale = entry.state == EntryState::Stale;
        let snapshot = entry.snapshot.clone();
        let guard = CacheReadGuard::new(self.shared.pins.clone(), song_id);
        drop(inner);

        if let Err(e) = self.shared.index.touch(song_id, now).await {
            tracing::warn!(song_id = %song_id, error = %e, "Failed to record offline access");
        }

        if stale && self.shared.refresh_on_access.load(Ordering::Relaxed) {
            let cache = self.clone();
            tokio::spawn(async move {
                if let Err(e) = cache.refresh(song_id).await {
                    tracing::warn!(song_id = %song_id, error = %e, "Background refresh failed");
                }
            });
        }

        Ok(CacheLookup::Hit(CachedSong {
            snapshot,
            path: self.blob_path(song_id),
            stale,
            guard,
        }))
    }

    /// Pin a resident entry against eviction until [`release`](Self::release).
    pub async fn reserve(&self, song_id: SongId) -> CacheResult<()> {
        let inner = self.shared.inner.lock().await;
        match inner.entries.get(&song_id) {
            Some(entry) if entry.state.is_resident() => {
                self.shared.pins.reserve(song_id);
                Ok(())
            }
            _ => Err(CacheError::NotCached(song_id)),
        }
    }

    /// Drop one reservation. Read pins are never released here.
    pub fn release(&self, song_id: SongId) -> CacheResult<()> {
        if self.shared.pins.unreserve(song_id) {
            Ok(())
        } else {
            Err(CacheError::NotReserved(song_id))
        }
    }

    pub async fn state(&self, song_id: SongId) -> EntryState {
        let inner = self.shared.inner.lock().await;
        match inner.entries.get(&song_id) {
            Some(entry) => entry.state,
            None => self
                .shared
                .in_flight()
                .get(&song_id)
                .copied()
                .unwrap_or(EntryState::Absent),
        }
    }

    /// Make a song available offline.
    ///
    /// Already resident songs are returned as they are. A failed fetch leaves
    /// the song absent and is not retried.
    pub async fn save(&self, song_id: SongId) -> CacheResult<SongSnapshot> {
        let _claim = {
            let inner = self.shared.inner.lock().await;
            if let Some(entry) = inner.entries.get(&song_id) {
                if entry.state.is_evictable() {
                    return Ok(entry.snapshot.clone());
                }
                return Err(CacheError::Busy(song_id));
            }
            InFlight::claim(&self.shared, song_id, EntryState::Fetching)
                .ok_or(CacheError::Busy(song_id))?
        };

        tracing::info!(song_id = %song_id, "Fetching song for offline use");
        match self.fetch_new(song_id).await {
            Ok(snapshot) => {
                tracing::info!(
                    song_id = %song_id,
                    size = snapshot.content_length,
                    "Song available offline"
                );
                Ok(snapshot)
            }
            Err(e) => {
                tracing::warn!(song_id = %song_id, error = %e, "Offline fetch failed");
                if let Err(cleanup) = self.shared.index.delete(song_id).await {
                    tracing::warn!(song_id = %song_id, error = %cleanup, "Failed to clear fetch record");
                }
                Err(e)
            }
        }
    }

    async fn fetch_new(&self, song_id: SongId) -> CacheResult<SongSnapshot> {
        let snapshot = self.shared.remote.fetch_song(song_id).await?;
        let size = snapshot.content_length;

        // Fail before downloading when pinned entries leave no room.
        {
            let inner = self.shared.inner.lock().await;
            self.plan_eviction(&inner, size, None)?;
        }

        let now = OffsetDateTime::now_utc();
        self.shared
            .index
            .upsert(&EntryRow::new(&snapshot, EntryState::Fetching, 0, now, now)?)
            .await?;

        let tmp = self.download(&snapshot).await?;
        let committed = self.commit_new(&snapshot, &tmp).await;
        if committed.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        committed.map(|()| snapshot)
    }

    async fn commit_new(&self, snapshot: &SongSnapshot, tmp: &Path) -> CacheResult<()> {
        let size = snapshot.content_length;
        let mut inner = self.shared.inner.lock().await;
        let victims = self.plan_eviction(&inner, size, None)?;
        self.evict_locked(&mut inner, &victims).await?;

        let path = self.blob_path(snapshot.id);
        tokio::fs::rename(tmp, &path).await?;

        let now = OffsetDateTime::now_utc();
        let entry = Entry {
            state: EntryState::Cached,
            size,
            snapshot: snapshot.clone(),
            fetched_at: now,
            last_access_at: now,
            seq: inner.next_seq(),
        };
        if let Err(e) = self.shared.index.upsert(&entry.row()?).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e);
        }
        inner.used += size;
        inner.entries.insert(snapshot.id, entry);
        Ok(())
    }

    /// Bring a stale entry up to date with the server.
    ///
    /// Returns `false` when the entry was already current. On failure the
    /// entry stays `Stale`, except that a song the server no longer has is
    /// evicted unless pinned.
    pub async fn refresh(&self, song_id: SongId) -> CacheResult<bool> {
        let (old, old_size) = {
            let mut inner = self.shared.inner.lock().await;
            let entry = inner
                .entries
                .get_mut(&song_id)
                .ok_or(CacheError::NotCached(song_id))?;
            match entry.state {
                EntryState::Cached => return Ok(false),
                EntryState::Refreshing => return Err(CacheError::Busy(song_id)),
                EntryState::Stale => {}
                _ => return Err(CacheError::NotCached(song_id)),
            }
            self.shared
                .index
                .set_state(song_id, EntryState::Refreshing)
                .await?;
            entry.state = EntryState::Refreshing;
            (entry.snapshot.clone(), entry.size)
        };

        let guard = RefreshGuard::new(self, song_id);

        match self.refresh_payload(&old, old_size).await {
            Ok(()) => {
                guard.disarm();
                tracing::info!(song_id = %song_id, "Offline entry refreshed");
                Ok(true)
            }
            Err(e) => {
                guard.restore().await;
                if matches!(e, CacheError::Remote(RemoteError::NotFound(_)))
                    && self.evict_if_idle(song_id).await?
                {
                    tracing::info!(song_id = %song_id, "Song deleted on server, evicted");
                }
                Err(e)
            }
        }
    }

    async fn refresh_payload(&self, old: &SongSnapshot, old_size: u64) -> CacheResult<()> {
        let fresh = self.shared.remote.fetch_song(old.id).await?;

        if fresh.content_hash == old.content_hash && fresh.content_length == old_size {
            let mut inner = self.shared.inner.lock().await;
            let entry = inner
                .entries
                .get_mut(&old.id)
                .ok_or(CacheError::NotCached(old.id))?;
            entry.snapshot = fresh;
            entry.state = EntryState::Cached;
            let row = entry.row()?;
            return self.shared.index.upsert(&row).await;
        }

        if fresh.content_length > old_size {
            let inner = self.shared.inner.lock().await;
            self.plan_eviction(&inner, fresh.content_length - old_size, Some(old.id))?;
        }

        let tmp = self.download(&fresh).await?;
        let committed = self.commit_refresh(fresh, &tmp).await;
        if committed.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        committed
    }

    async fn commit_refresh(&self, fresh: SongSnapshot, tmp: &Path) -> CacheResult<()> {
        let song_id = fresh.id;
        let new_size = fresh.content_length;
        let mut inner = self.shared.inner.lock().await;
        let old_size = inner
            .entries
            .get(&song_id)
            .map(|entry| entry.size)
            .ok_or(CacheError::NotCached(song_id))?;

        if new_size > old_size {
            let victims = self.plan_eviction(&inner, new_size - old_size, Some(song_id))?;
            self.evict_locked(&mut inner, &victims).await?;
        }

        // Readers holding the old file keep their handle; new reads see the new payload.
        tokio::fs::rename(tmp, self.blob_path(song_id)).await?;
        inner.used = inner.used - old_size + new_size;

        let entry = inner
            .entries
            .get_mut(&song_id)
            .ok_or(CacheError::NotCached(song_id))?;
        entry.snapshot = fresh;
        entry.size = new_size;
        entry.state = EntryState::Cached;
        entry.fetched_at = OffsetDateTime::now_utc();
        let row = entry.row()?;
        self.shared.index.upsert(&row).await
    }

    async fn restore_stale(&self, song_id: SongId) {
        {
            let mut inner = self.shared.inner.lock().await;
            let Some(entry) = inner.entries.get_mut(&song_id) else {
                return;
            };
            if entry.state != EntryState::Refreshing {
                return;
            }
            entry.state = EntryState::Stale;
        }
        if let Err(e) = self
            .shared
            .index
            .set_state(song_id, EntryState::Stale)
            .await
        {
            tracing::warn!(song_id = %song_id, error = %e, "Failed to record stale state");
        }
    }

    /// Explicitly evict one song.
    pub async fn remove(&self, song_id: SongId) -> CacheResult<()> {
        let _claim = {
            let mut inner = self.shared.inner.lock().await;
            let Some(entry) = inner.entries.get(&song_id) else {
                if self.shared.in_flight().contains_key(&song_id) {
                    return Err(CacheError::Busy(song_id));
                }
                return Err(CacheError::NotCached(song_id));
            };
            if entry.state == EntryState::Refreshing {
                return Err(CacheError::Busy(song_id));
            }
            if self.shared.pins.is_pinned(song_id) {
                return Err(CacheError::Reserved(song_id));
            }
            self.detach(&mut inner, song_id)
                .ok_or(CacheError::Busy(song_id))?
        };
        self.discard(song_id).await
    }

    /// Compare every entry with the server catalog.
    ///
    /// Entries the server modified since they were fetched become `Stale`
    /// and are refreshed; entries the server no longer has are evicted unless
    /// pinned. The catalog is fetched without holding the cache lock.
    pub async fn reconcile(&self) -> CacheResult<ReconcileReport> {
        let known: Vec<SongId> = {
            let inner = self.shared.inner.lock().await;
            inner.entries.keys().copied().collect()
        };
        let mut report = ReconcileReport::default();
        if known.is_empty() {
            return Ok(report);
        }

        let catalog: HashMap<SongId, SongSnapshot> = self
            .shared
            .remote
            .list_catalog()
            .await?
            .into_iter()
            .map(|song| (song.id, song))
            .collect();

        let (newly_stale, gone) = {
            let mut inner = self.shared.inner.lock().await;
            let mut newly_stale = Vec::new();
            let mut gone = Vec::new();
            for song_id in &known {
                let Some(entry) = inner.entries.get_mut(song_id) else {
                    continue;
                };
                report.checked += 1;
                match catalog.get(song_id) {
                    Some(server) if server.updated_at > entry.snapshot.updated_at => {
                        if entry.state == EntryState::Cached {
                            entry.state = EntryState::Stale;
                            newly_stale.push(*song_id);
                        }
                    }
                    Some(_) => {}
                    None if entry.state.is_evictable() => gone.push(*song_id),
                    // Mid-refresh; the next pass retries.
                    None => {}
                }
            }
            (newly_stale, gone)
        };

        // Index writes and file deletes run with the lock released so
        // foreground reads are not held up.
        for song_id in &newly_stale {
            self.shared
                .index
                .set_state(*song_id, EntryState::Stale)
                .await?;
        }
        report.marked_stale = newly_stale.len() as u64;
        for song_id in gone {
            // Pinned entries are skipped; the next pass retries.
            if self.evict_if_idle(song_id).await? {
                report.evicted += 1;
            }
        }

        let stale: Vec<SongId> = {
            let inner = self.shared.inner.lock().await;
            inner
                .entries
                .iter()
                .filter(|(_, entry)| entry.state == EntryState::Stale)
                .map(|(id, _)| *id)
                .collect()
        };
        for song_id in stale {
            match self.refresh(song_id).await {
                Ok(true) => report.refreshed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(song_id = %song_id, error = %e, "Refresh during reconciliation failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            marked_stale = report.marked_stale,
            refreshed = report.refreshed,
            evicted = report.evicted,
            failed = report.failed,
            "Offline reconciliation complete"
        );
        Ok(report)
    }

    /// Run [`reconcile`](Self::reconcile) every `interval` on a background task.
    pub fn spawn_reconciler(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            tracing::info!(
                interval_secs = interval.as_secs(),
                "Offline reconciler enabled"
            );
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = cache.reconcile().await {
                    tracing::warn!(error = %e, "Offline reconciliation failed");
                }
            }
        })
    }

    pub async fn status(&self) -> CacheStatus {
        let inner = self.shared.inner.lock().await;
        let mut entries: Vec<(&SongId, &Entry)> = inner.entries.iter().collect();
        entries.sort_by(|a, b| b.1.seq.cmp(&a.1.seq));
        let entries = entries
            .into_iter()
            .map(|(song_id, entry)| EntryStatus {
                song_id: *song_id,
                title: entry.snapshot.title.clone(),
                artist: entry.snapshot.artist.clone(),
                state: entry.state,
                size: entry.size,
                last_access_at: entry.last_access_at,
                pinned: self.shared.pins.is_pinned(*song_id),
            })
            .collect();
        CacheStatus {
            capacity: self.shared.capacity,
            used: inner.used,
            entries,
        }
    }

    /// Choose entries to evict so that `needed` more bytes fit.
    ///
    /// Candidates are unpinned `Cached`/`Stale` entries other than `exclude`,
    /// oldest access first. Nothing is evicted here.
    fn plan_eviction(
        &self,
        inner: &Inner,
        needed: u64,
        exclude: Option<SongId>,
    ) -> CacheResult<Vec<SongId>> {
        let capacity = self.shared.capacity;
        let full = CacheError::CacheFull { needed, capacity };
        if needed > capacity {
            return Err(full);
        }

        let mut projected = inner.used + needed;
        if projected <= capacity {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(&SongId, &Entry)> = inner
            .entries
            .iter()
            .filter(|(id, entry)| {
                entry.state.is_evictable()
                    && Some(**id) != exclude
                    && !self.shared.pins.is_pinned(**id)
            })
            .collect();
        candidates.sort_by_key(|(_, entry)| entry.seq);

        let mut victims = Vec::new();
        for (song_id, entry) in candidates {
            if projected <= capacity {
                break;
            }
            projected = projected.saturating_sub(entry.size);
            victims.push(*song_id);
        }

        if projected > capacity {
            return Err(full);
        }
        Ok(victims)
    }

    /// Evict `victims` while holding the lock, so the freed room cannot be
    /// taken by anyone else.
    async fn evict_locked(&self, inner: &mut Inner, victims: &[SongId]) -> CacheResult<()> {
        for &song_id in victims {
            self.forget(inner, song_id);
            self.discard(song_id).await?;
        }
        Ok(())
    }

    /// Evict `song_id` if it is still evictable and unpinned. Its payload and
    /// row are deleted with the lock released.
    async fn evict_if_idle(&self, song_id: SongId) -> CacheResult<bool> {
        let claim = {
            let mut inner = self.shared.inner.lock().await;
            let idle = inner
                .entries
                .get(&song_id)
                .is_some_and(|entry| entry.state.is_evictable())
                && !self.shared.pins.is_pinned(song_id);
            if !idle {
                return Ok(false);
            }
            self.detach(&mut inner, song_id)
        };
        let Some(_claim) = claim else {
            return Ok(false);
        };
        self.discard(song_id).await?;
        Ok(true)
    }

    /// Drop the in-memory entry and claim the song until its files are gone,
    /// so a concurrent save reports `Busy` instead of racing the delete.
    fn detach(&self, inner: &mut Inner, song_id: SongId) -> Option<InFlight<'_>> {
        let claim = InFlight::claim(&self.shared, song_id, EntryState::Evicted)?;
        self.forget(inner, song_id);
        Some(claim)
    }

    fn forget(&self, inner: &mut Inner, song_id: SongId) {
        if let Some(entry) = inner.entries.remove(&song_id) {
            inner.used = inner.used.saturating_sub(entry.size);
            tracing::info!(
                song_id = %song_id,
                size = entry.size,
                title = %entry.snapshot.title,
                "LRU eviction"
            );
        }
    }

    async fn discard(&self, song_id: SongId) -> CacheResult<()> {
        // Marked first so a crash mid-eviction is cleaned up on open.
        self.shared
            .index
            .set_state(song_id, EntryState::Evicted)
            .await?;
        remove_file_if_exists(&self.blob_path(song_id)).await?;
        self.shared.index.delete(song_id).await
    }

    /// Stream a payload into `tmp/`, checking it against the snapshot.
    async fn download(&self, snapshot: &SongSnapshot) -> CacheResult<PathBuf> {
        let tmp = self
            .shared
            .dir
            .join(TMP_DIR)
            .join(format!("{}.{}.part", snapshot.id, Uuid::new_v4()));
        match self.download_to(&tmp, snapshot).await {
            Ok(()) => Ok(tmp),
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(e)
            }
        }
    }

    async fn download_to(&self, path: &Path, snapshot: &SongSnapshot) -> CacheResult<()> {
        let mut stream = self.shared.remote.fetch_audio(snapshot.id).await?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut hasher = ContentHash::hasher();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if hasher.bytes_hashed() + chunk.len() as u64 > snapshot.content_length {
                return Err(CacheError::Integrity(format!(
                    "song {} sent more than {} bytes",
                    snapshot.id, snapshot.content_length
                )));
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;

        let received = hasher.bytes_hashed();
        if received != snapshot.content_length {
            return Err(CacheError::Integrity(format!(
                "song {} ended after {received} of {} bytes",
                snapshot.id, snapshot.content_length
            )));
        }
        let hash = hasher.finalize().to_hex();
        if hash != snapshot.content_hash {
            return Err(CacheError::Integrity(format!(
                "song {} hash mismatch: expected {}, got {hash}",
                snapshot.id, snapshot.content_hash
            )));
        }
        Ok(())
    }

    fn blob_path(&self, song_id: SongId) -> PathBuf {
        self.shared.dir.join(BLOBS_DIR).join(song_id.to_string())
    }
}

async fn file_len(path: &Path) -> CacheResult<Option<u64>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_file_if_exists(path: &Path) -> CacheResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
