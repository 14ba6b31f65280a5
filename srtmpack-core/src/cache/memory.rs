//! In-memory cache store
//!
//! Nothing survives the process; useful for tests and for callers that want
//! the pipeline without a durable cache.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use super::{CacheEntry, CacheStore, StorageInfo};
use crate::error::DownloadError;
use crate::manifest::DownloadSession;
use crate::tile::TileId;

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<TileId, CacheEntry>>,
    sessions: Mutex<HashMap<String, DownloadSession>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCacheStore {
    async fn init(&self) -> Result<(), DownloadError> {
        Ok(())
    }

    async fn is_initialized(&self) -> bool {
        true
    }

    async fn get(&self, id: &TileId) -> Result<Option<CacheEntry>, DownloadError> {
        let mut entries = self.entries.lock().await;
        Ok(entries.get_mut(id).map(|entry| {
            entry.last_accessed = Utc::now();
            entry.clone()
        }))
    }

    async fn has(&self, id: &TileId) -> Result<bool, DownloadError> {
        Ok(self.entries.lock().await.contains_key(id))
    }

    async fn store(&self, entry: CacheEntry) -> Result<(), DownloadError> {
        self.entries.lock().await.insert(entry.id, entry);
        Ok(())
    }

    async fn delete(&self, id: &TileId) -> Result<bool, DownloadError> {
        Ok(self.entries.lock().await.remove(id).is_some())
    }

    async fn clear(&self) -> Result<(), DownloadError> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn all_tiles(&self) -> Result<Vec<TileId>, DownloadError> {
        let mut tiles: Vec<TileId> = self.entries.lock().await.keys().copied().collect();
        tiles.sort();
        Ok(tiles)
    }

    async fn storage_info(&self) -> Result<StorageInfo, DownloadError> {
        let entries = self.entries.lock().await;
        Ok(StorageInfo {
            tile_count: entries.len(),
            total_size: entries.values().map(|e| e.size).sum(),
            oldest: entries.values().map(|e| e.timestamp).min(),
            newest: entries.values().map(|e| e.timestamp).max(),
        })
    }

    async fn prune_older_than(&self, max_age_days: u32) -> Result<usize, DownloadError> {
        let mut entries = self.entries.lock().await;
        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        let before = entries.len();
        entries.retain(|_, entry| entry.last_accessed >= cutoff);
        Ok(before - entries.len())
    }

    async fn put_session(&self, session: &DownloadSession) -> Result<(), DownloadError> {
        self.sessions
            .lock()
            .await
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(
        &self,
        session_id: &str,
    ) -> Result<Option<DownloadSession>, DownloadError> {
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }
}
