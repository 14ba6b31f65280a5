//! Durable tile cache
//!
//! Downloaded payloads are kept in a key/value store so repeat sessions skip
//! the network. The store also persists session manifests. Implementations
//! serialize access internally and may be shared between managers.

pub mod disk;
pub mod memory;

use std::future::Future;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::DownloadError;
use crate::manifest::DownloadSession;
use crate::tile::TileId;

pub use disk::DiskCacheStore;
pub use memory::MemoryCacheStore;

/// One cached tile payload plus bookkeeping metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub id: TileId,
    pub data: Bytes,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Whether `data` is still gzip-compressed.
    pub compressed: bool,
}

impl CacheEntry {
    pub fn new(id: TileId, data: Bytes, compressed: bool) -> Self {
        let now = Utc::now();
        let size = data.len() as u64;
        Self {
            id,
            data,
            size,
            timestamp: now,
            last_accessed: now,
            compressed,
        }
    }
}

/// Aggregate numbers for `cache info` style reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageInfo {
    pub tile_count: usize,
    pub total_size: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// Durable mapping of tile id to payload.
///
/// `init` is idempotent and safe to call concurrently; every other method
/// initializes on demand, so calling it up front is an optimization, not a
/// requirement. A `get` miss is `Ok(None)`, never an error; reads refresh the
/// entry's `last_accessed` stamp; `store` overwrites an existing id.
pub trait CacheStore: Send + Sync {
    fn init(&self) -> impl Future<Output = Result<(), DownloadError>> + Send;

    fn is_initialized(&self) -> impl Future<Output = bool> + Send;

    fn get(
        &self,
        id: &TileId,
    ) -> impl Future<Output = Result<Option<CacheEntry>, DownloadError>> + Send;

    /// Existence check that does not touch the payload or refresh
    /// `last_accessed`; bulk queries go through this.
    fn has(&self, id: &TileId) -> impl Future<Output = Result<bool, DownloadError>> + Send;

    fn store(&self, entry: CacheEntry) -> impl Future<Output = Result<(), DownloadError>> + Send;

    fn delete(&self, id: &TileId) -> impl Future<Output = Result<bool, DownloadError>> + Send;

    fn clear(&self) -> impl Future<Output = Result<(), DownloadError>> + Send;

    fn all_tiles(&self) -> impl Future<Output = Result<Vec<TileId>, DownloadError>> + Send;

    fn storage_info(&self) -> impl Future<Output = Result<StorageInfo, DownloadError>> + Send;

    /// Drop entries not accessed within `max_age_days`. Returns the number
    /// removed; least-recently-accessed entries go first.
    fn prune_older_than(
        &self,
        max_age_days: u32,
    ) -> impl Future<Output = Result<usize, DownloadError>> + Send;

    fn put_session(
        &self,
        session: &DownloadSession,
    ) -> impl Future<Output = Result<(), DownloadError>> + Send;

    fn get_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Option<DownloadSession>, DownloadError>> + Send;
}
