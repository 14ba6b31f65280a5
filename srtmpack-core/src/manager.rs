//! Download manager
//!
//! Orchestrates the whole pipeline: cache probe, network fetch, inflate,
//! and ZIP assembly, all scheduled through one bounded pool. Owns the single
//! authoritative progress stream for a session and the session's abort
//! token.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::archive::{self, ZipEntry};
use crate::cache::{CacheEntry, CacheStore};
use crate::error::DownloadError;
use crate::fetch::{FetchProgress, FetcherOptions, TileFetcher, DEFAULT_BASE_URL};
use crate::gzip;
use crate::manifest::{DownloadSession, SessionStatistics, SessionStatus};
use crate::pool::concurrent_pool;
use crate::tile::TileId;

pub type ProgressCallback = Box<dyn Fn(DownloadProgress) + Send + Sync>;
pub type TileCompleteCallback = Box<dyn Fn(TileId, bool) + Send + Sync>;
pub type CompleteCallback = Box<dyn Fn(&Bytes) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(&DownloadError) + Send + Sync>;

/// Snapshot emitted through `on_progress`.
///
/// `total` is fixed when the session starts; `current` counts each planned
/// tile exactly once whether it came from cache, network, or was an ocean
/// skip.
#[derive(Debug, Clone)]
pub struct DownloadProgress {
    pub current: usize,
    pub total: usize,
    pub bytes_downloaded: u64,
    pub speed_bytes_per_sec: f64,
    /// The tile that just settled, when the update was caused by one.
    pub tile_id: Option<TileId>,
}

/// Monotonic cache counters for the lifetime of a manager instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub write_errors: u64,
}

#[derive(Default)]
struct CacheStatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    write_errors: AtomicU64,
}

impl CacheStatsCounters {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
        }
    }
}

/// Byte/speed accounting, fed by fetch progress events.
///
/// The meter never emits progress itself; it only updates the numbers the
/// next `update_progress` call reads. Keeping counting and emission apart is
/// what keeps `current` monotone under concurrent workers.
struct BandwidthMeter {
    started: Instant,
    bytes: u64,
    loaded: HashMap<TileId, u64>,
}

impl BandwidthMeter {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            bytes: 0,
            loaded: HashMap::new(),
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn observe(&mut self, progress: &FetchProgress) {
        let prev = self
            .loaded
            .insert(progress.tile_id, progress.loaded)
            .unwrap_or(0);
        // A retried request restarts its cumulative count from zero.
        let delta = if progress.loaded >= prev {
            progress.loaded - prev
        } else {
            progress.loaded
        };
        self.bytes += delta;
    }

    fn snapshot(&self) -> (u64, f64) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            self.bytes as f64 / elapsed
        } else {
            0.0
        };
        (self.bytes, speed)
    }
}

pub struct ManagerOptions {
    /// Concurrent tile downloads; clamped to at least 1.
    pub concurrent_downloads: usize,
    pub use_cache: bool,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    pub base_url: String,
    pub on_progress: Option<ProgressCallback>,
    pub on_tile_complete: Option<TileCompleteCallback>,
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            concurrent_downloads: 3,
            use_cache: true,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
            base_url: DEFAULT_BASE_URL.to_string(),
            on_progress: None,
            on_tile_complete: None,
            on_complete: None,
            on_error: None,
        }
    }
}

/// What [`DownloadManager::statistics`] returns; cache stats are always
/// available, session stats only while/after a session exists.
#[derive(Debug, Clone)]
pub struct ManagerStatistics {
    pub session: Option<SessionStatistics>,
    pub cache: CacheStats,
}

pub struct DownloadManager<C: CacheStore> {
    fetcher: TileFetcher,
    store: Arc<C>,
    options: ManagerOptions,
    cache_stats: Arc<CacheStatsCounters>,
    session: tokio::sync::Mutex<Option<DownloadSession>>,
    cancel: Mutex<Option<CancellationToken>>,
    tiles_completed: AtomicUsize,
    tiles_total: AtomicUsize,
    meter: Mutex<BandwidthMeter>,
    active: AtomicBool,
}

impl<C: CacheStore + 'static> DownloadManager<C> {
    pub fn new(store: Arc<C>, options: ManagerOptions) -> Result<Self, DownloadError> {
        let fetcher = TileFetcher::new(FetcherOptions {
            base_url: options.base_url.clone(),
            max_retries: options.retry_attempts,
            retry_delay: options.retry_delay,
            timeout: options.timeout,
        })?;

        Ok(Self {
            fetcher,
            store,
            options,
            cache_stats: Arc::new(CacheStatsCounters::default()),
            session: tokio::sync::Mutex::new(None),
            cancel: Mutex::new(None),
            tiles_completed: AtomicUsize::new(0),
            tiles_total: AtomicUsize::new(0),
            meter: Mutex::new(BandwidthMeter::new()),
            active: AtomicBool::new(false),
        })
    }

    /// Run the full pipeline over `ids` and return the finished archive.
    ///
    /// Per-tile failures are recorded in the session and do not abort the
    /// run; cancellation and session-fatal conditions do.
    pub async fn start_download(&self, ids: &[TileId]) -> Result<Bytes, DownloadError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(DownloadError::Internal(
                "a download session is already active".to_string(),
            ));
        }

        let result = self.run_session(ids).await;
        self.active.store(false, Ordering::SeqCst);

        match &result {
            Ok(blob) => {
                if let Some(on_complete) = &self.options.on_complete {
                    on_complete(blob);
                }
            }
            Err(DownloadError::Aborted) => {}
            Err(e) => {
                if let Some(on_error) = &self.options.on_error {
                    on_error(e);
                }
            }
        }

        result
    }

    /// Abort the active session. In-flight fetches stop, queued tiles never
    /// start, and the pending `start_download` returns `Aborted`.
    pub fn cancel_download(&self) {
        let cancel = self.cancel.lock().unwrap().clone();
        if let Some(cancel) = cancel {
            log::debug!("Cancelling active download session");
            cancel.cancel();
        }
    }

    pub async fn statistics(&self) -> ManagerStatistics {
        let session = self.session.lock().await;
        ManagerStatistics {
            session: session.as_ref().map(|s| s.statistics()),
            cache: self.cache_stats.snapshot(),
        }
    }

    /// Manifest of the current or most recent session.
    pub async fn session(&self) -> Option<DownloadSession> {
        self.session.lock().await.clone()
    }

    /// Which of `ids` are already cached. Probes through the same bounded
    /// pool as the download path; a store that cannot initialize yields an
    /// empty set.
    pub async fn cached_tiles(&self, ids: &[TileId]) -> HashSet<TileId> {
        if let Err(e) = self.store.init().await {
            log::debug!("Cache unavailable for overlay probe: {}", e);
            return HashSet::new();
        }

        let store = &self.store;
        concurrent_pool(
            ids.to_vec(),
            self.options.concurrent_downloads.max(1),
            CancellationToken::new(),
            |id| async move { (id, store.has(&id).await) },
        )
        .filter_map(|(id, present)| async move {
            match present {
                Ok(true) => Some(id),
                Ok(false) => None,
                Err(e) => {
                    log::debug!("Cache probe failed for tile {}: {}", id, e);
                    None
                }
            }
        })
        .collect()
        .await
    }

    async fn run_session(&self, ids: &[TileId]) -> Result<Bytes, DownloadError> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap() = Some(cancel.clone());

        self.tiles_total.store(ids.len(), Ordering::SeqCst);
        self.tiles_completed.store(0, Ordering::SeqCst);
        self.meter.lock().unwrap().reset();

        {
            let mut session = self.session.lock().await;
            let mut new_session = DownloadSession::new(ids.to_vec());
            new_session.set_status(SessionStatus::Downloading);
            *session = Some(new_session);
        }
        self.save_session().await;
        self.update_progress(None);

        let cache_ready = if self.options.use_cache {
            match self.store.init().await {
                Ok(()) => true,
                Err(e) => {
                    log::debug!("Cache store unavailable, downloading everything: {}", e);
                    false
                }
            }
        } else {
            false
        };

        let limit = self.options.concurrent_downloads.max(1);
        let pool_cancel = cancel.clone();
        let outcomes = concurrent_pool(ids.to_vec(), limit, cancel.clone(), move |id| {
            self.process_tile(id, pool_cancel.clone(), cache_ready)
        });
        let entries = outcomes.filter_map(|outcome| self.settle_tile(outcome));

        let blob_result = archive::build_zip(entries).await;

        let result = if cancel.is_cancelled() {
            self.finish_session(SessionStatus::Cancelled).await;
            Err(DownloadError::Aborted)
        } else {
            match blob_result {
                Ok(blob) => {
                    self.finish_session(SessionStatus::Completed).await;
                    Ok(blob)
                }
                Err(e) => {
                    log::error!("Archive assembly failed: {}", e);
                    self.finish_session(SessionStatus::Failed).await;
                    Err(e)
                }
            }
        };

        *self.cancel.lock().unwrap() = None;
        result
    }

    /// Produce one tile's decompressed payload: cache first, then network.
    /// `Ok(None)` is an ocean tile.
    async fn process_tile(
        &self,
        id: TileId,
        cancel: CancellationToken,
        cache_ready: bool,
    ) -> (TileId, Result<Option<Bytes>, DownloadError>) {
        if cache_ready {
            if let Some(data) = self.probe_cache(&id).await {
                return (id, Ok(Some(data)));
            }
        }

        (id, self.fetch_and_store(id, &cancel, cache_ready).await)
    }

    /// Cache lookup including inflate of a compressed stored payload. Any
    /// failure degrades to a miss so the network path can still win.
    async fn probe_cache(&self, id: &TileId) -> Option<Bytes> {
        match self.store.get(id).await {
            Ok(Some(entry)) => {
                let inflated = if entry.compressed || gzip::is_gzip(&entry.data) {
                    gzip::decompress(&entry.data)
                } else {
                    Ok(entry.data.to_vec())
                };
                match inflated {
                    Ok(data) => {
                        self.cache_stats.hits.fetch_add(1, Ordering::Relaxed);
                        Some(Bytes::from(data))
                    }
                    Err(e) => {
                        self.cache_stats.errors.fetch_add(1, Ordering::Relaxed);
                        log::debug!("Cache read error for tile {}: {}", id, e);
                        None
                    }
                }
            }
            Ok(None) => {
                self.cache_stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.cache_stats.errors.fetch_add(1, Ordering::Relaxed);
                log::debug!("Cache read error for tile {}: {}", id, e);
                None
            }
        }
    }

    async fn fetch_and_store(
        &self,
        id: TileId,
        cancel: &CancellationToken,
        cache_ready: bool,
    ) -> Result<Option<Bytes>, DownloadError> {
        let compressed = self
            .fetcher
            .fetch(&id, cancel, |progress| {
                self.meter.lock().unwrap().observe(&progress);
            })
            .await?;

        let Some(compressed) = compressed else {
            log::debug!("Tile {} not on origin (ocean), skipping", id);
            return Ok(None);
        };

        let data = gzip::decompress(&compressed)?;
        if data.len() != gzip::SRTM1_TILE_BYTES {
            return Err(DownloadError::Decompress(format!(
                "tile {} inflated to {} bytes, expected {}",
                id,
                data.len(),
                gzip::SRTM1_TILE_BYTES
            )));
        }

        if cache_ready {
            // Write-back happens off the critical path; a failed store only
            // costs a counter bump.
            let store = self.store.clone();
            let stats = self.cache_stats.clone();
            tokio::spawn(async move {
                let entry = CacheEntry::new(id, compressed, true);
                if let Err(e) = store.store(entry).await {
                    stats.write_errors.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Cache write error for tile {}: {}", id, e);
                }
            });
        }

        Ok(Some(Bytes::from(data)))
    }

    /// Record one settled tile and emit the archive entry for successes.
    /// Abort outcomes do their accounting at session level instead.
    async fn settle_tile(
        &self,
        (id, result): (TileId, Result<Option<Bytes>, DownloadError>),
    ) -> Option<ZipEntry> {
        match result {
            Ok(Some(data)) => {
                self.record_in_session(|s| s.mark_completed(id)).await;
                self.finish_tile(id, true);
                Some(ZipEntry { id, data })
            }
            Ok(None) => {
                self.record_in_session(|s| s.mark_skipped(id)).await;
                self.finish_tile(id, true);
                None
            }
            Err(DownloadError::Aborted) => None,
            Err(e) => {
                log::debug!("Tile {} failed: {}", id, e);
                self.record_in_session(|s| s.mark_failed(id, e.to_string()))
                    .await;
                self.finish_tile(id, false);
                None
            }
        }
    }

    async fn record_in_session(&self, update: impl FnOnce(&mut DownloadSession)) {
        let (bytes, _) = self.meter.lock().unwrap().snapshot();
        let mut session = self.session.lock().await;
        if let Some(session) = session.as_mut() {
            update(session);
            session.progress.bytes_downloaded = bytes;
        }
    }

    fn finish_tile(&self, id: TileId, success: bool) {
        self.tiles_completed.fetch_add(1, Ordering::SeqCst);
        if let Some(on_tile_complete) = &self.options.on_tile_complete {
            on_tile_complete(id, success);
        }
        self.update_progress(Some(id));
    }

    /// The single place user-visible progress is emitted from.
    fn update_progress(&self, tile_id: Option<TileId>) {
        let Some(on_progress) = &self.options.on_progress else {
            return;
        };
        let (bytes_downloaded, speed_bytes_per_sec) = self.meter.lock().unwrap().snapshot();
        on_progress(DownloadProgress {
            current: self.tiles_completed.load(Ordering::SeqCst),
            total: self.tiles_total.load(Ordering::SeqCst),
            bytes_downloaded,
            speed_bytes_per_sec,
            tile_id,
        });
    }

    async fn finish_session(&self, status: SessionStatus) {
        {
            let mut session = self.session.lock().await;
            if let Some(session) = session.as_mut() {
                session.set_status(status);
            }
        }
        self.save_session().await;
    }

    /// Best-effort manifest checkpoint; a failing save never fails the
    /// download.
    async fn save_session(&self) {
        let snapshot = { self.session.lock().await.clone() };
        if let Some(session) = snapshot {
            if let Err(e) = self.store.put_session(&session).await {
                log::debug!("Could not persist session {}: {}", session.session_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(s: &str) -> TileId {
        TileId::parse(s).unwrap()
    }

    #[test]
    fn default_options_match_documented_values() {
        let options = ManagerOptions::default();
        assert_eq!(options.concurrent_downloads, 3);
        assert!(options.use_cache);
        assert_eq!(options.retry_attempts, 3);
        assert_eq!(options.retry_delay, Duration::from_millis(100));
        assert_eq!(options.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn meter_accumulates_chunk_deltas() {
        let id = tile("N36W112");
        let mut meter = BandwidthMeter::new();

        for loaded in [100u64, 250, 400] {
            meter.observe(&FetchProgress {
                tile_id: id,
                loaded,
                total: Some(400),
            });
        }

        let (bytes, _) = meter.snapshot();
        assert_eq!(bytes, 400);
    }

    #[test]
    fn meter_handles_retried_requests_restarting_from_zero() {
        let id = tile("N36W112");
        let mut meter = BandwidthMeter::new();

        meter.observe(&FetchProgress {
            tile_id: id,
            loaded: 300,
            total: None,
        });
        // Retry: cumulative count starts over.
        meter.observe(&FetchProgress {
            tile_id: id,
            loaded: 120,
            total: None,
        });

        let (bytes, _) = meter.snapshot();
        assert_eq!(bytes, 420);
    }

    #[test]
    fn meter_tracks_tiles_independently() {
        let mut meter = BandwidthMeter::new();
        meter.observe(&FetchProgress {
            tile_id: tile("N36W112"),
            loaded: 100,
            total: None,
        });
        meter.observe(&FetchProgress {
            tile_id: tile("N36W113"),
            loaded: 50,
            total: None,
        });

        let (bytes, _) = meter.snapshot();
        assert_eq!(bytes, 150);
    }
}
