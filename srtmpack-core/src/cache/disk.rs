//! Directory-backed cache store
//!
//! Payloads live as one file per tile under `tiles/`, metadata in a single
//! `index.json`, and session manifests under `sessions/`. All access goes
//! through one async mutex, so a store instance can be shared freely.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{CacheEntry, CacheStore, StorageInfo};
use crate::error::DownloadError;
use crate::manifest::DownloadSession;
use crate::tile::TileId;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    size: u64,
    timestamp: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    compressed: bool,
}

#[derive(Debug, Default)]
struct DiskState {
    index: HashMap<TileId, IndexRecord>,
}

pub struct DiskCacheStore {
    root: PathBuf,
    state: Mutex<Option<DiskState>>,
}

impl DiskCacheStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            state: Mutex::new(None),
        }
    }

    /// Store rooted at the platform cache directory, e.g.
    /// `~/.cache/srtmpack` on Linux.
    pub fn at_default_location() -> Result<Self, DownloadError> {
        let base = dirs::cache_dir().ok_or_else(|| {
            DownloadError::Storage("could not determine a cache directory".to_string())
        })?;
        Ok(Self::new(base.join("srtmpack")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tiles_dir(&self) -> PathBuf {
        self.root.join("tiles")
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn tile_path(&self, id: &TileId) -> PathBuf {
        self.tiles_dir().join(id.to_string())
    }

    async fn load_state(&self) -> Result<DiskState, DownloadError> {
        tokio::fs::create_dir_all(self.tiles_dir()).await?;
        tokio::fs::create_dir_all(self.sessions_dir()).await?;

        let index_path = self.index_path();
        let index = match tokio::fs::read_to_string(&index_path).await {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(index) => index,
                Err(e) => {
                    log::warn!(
                        "Cache index {} is unreadable, starting empty: {}",
                        index_path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(DiskState { index })
    }

    /// Lock the state, initializing from disk on first use.
    async fn state(
        &self,
    ) -> Result<tokio::sync::MappedMutexGuard<'_, DiskState>, DownloadError> {
        let mut guard = self.state.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_state().await?);
        }
        Ok(tokio::sync::MutexGuard::map(guard, |state| {
            state.as_mut().expect("state initialized above")
        }))
    }

    async fn write_index(&self, state: &DiskState) -> Result<(), DownloadError> {
        let contents = serde_json::to_string(&state.index)?;
        tokio::fs::write(self.index_path(), contents).await?;
        Ok(())
    }
}

impl CacheStore for DiskCacheStore {
    async fn init(&self) -> Result<(), DownloadError> {
        self.state().await?;
        Ok(())
    }

    async fn is_initialized(&self) -> bool {
        self.state.lock().await.is_some()
    }

    async fn get(&self, id: &TileId) -> Result<Option<CacheEntry>, DownloadError> {
        let mut state = self.state().await?;

        let Some(record) = state.index.get(id).cloned() else {
            return Ok(None);
        };

        let data = match tokio::fs::read(self.tile_path(id)).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Index said yes but the payload is gone; heal the index
                // and report a miss.
                log::debug!("Cache index entry for {} has no payload file", id);
                state.index.remove(id);
                let _ = self.write_index(&state).await;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if data.len() as u64 != record.size {
            return Err(DownloadError::Storage(format!(
                "cached payload for {} is {} bytes, index says {}",
                id,
                data.len(),
                record.size
            )));
        }

        let now = Utc::now();
        if let Some(record) = state.index.get_mut(id) {
            record.last_accessed = now;
        }
        let _ = self.write_index(&state).await;

        Ok(Some(CacheEntry {
            id: *id,
            data: Bytes::from(data),
            size: record.size,
            timestamp: record.timestamp,
            last_accessed: now,
            compressed: record.compressed,
        }))
    }

    async fn has(&self, id: &TileId) -> Result<bool, DownloadError> {
        let state = self.state().await?;
        Ok(state.index.contains_key(id))
    }

    async fn store(&self, entry: CacheEntry) -> Result<(), DownloadError> {
        let mut state = self.state().await?;

        tokio::fs::write(self.tile_path(&entry.id), &entry.data).await?;
        state.index.insert(
            entry.id,
            IndexRecord {
                size: entry.size,
                timestamp: entry.timestamp,
                last_accessed: entry.last_accessed,
                compressed: entry.compressed,
            },
        );
        self.write_index(&state).await
    }

    async fn delete(&self, id: &TileId) -> Result<bool, DownloadError> {
        let mut state = self.state().await?;

        let existed = state.index.remove(id).is_some();
        match tokio::fs::remove_file(self.tile_path(id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.write_index(&state).await?;
        Ok(existed)
    }

    async fn clear(&self) -> Result<(), DownloadError> {
        let mut state = self.state().await?;

        let tiles_dir = self.tiles_dir();
        match tokio::fs::remove_dir_all(&tiles_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&tiles_dir).await?;

        state.index.clear();
        self.write_index(&state).await
    }

    async fn all_tiles(&self) -> Result<Vec<TileId>, DownloadError> {
        let state = self.state().await?;
        let mut tiles: Vec<TileId> = state.index.keys().copied().collect();
        tiles.sort();
        Ok(tiles)
    }

    async fn storage_info(&self) -> Result<StorageInfo, DownloadError> {
        let state = self.state().await?;
        Ok(StorageInfo {
            tile_count: state.index.len(),
            total_size: state.index.values().map(|r| r.size).sum(),
            oldest: state.index.values().map(|r| r.timestamp).min(),
            newest: state.index.values().map(|r| r.timestamp).max(),
        })
    }

    async fn prune_older_than(&self, max_age_days: u32) -> Result<usize, DownloadError> {
        let mut state = self.state().await?;

        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        let mut stale: Vec<(TileId, DateTime<Utc>)> = state
            .index
            .iter()
            .filter(|(_, record)| record.last_accessed < cutoff)
            .map(|(id, record)| (*id, record.last_accessed))
            .collect();
        // Least recently accessed first.
        stale.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (id, _) in &stale {
            state.index.remove(id);
            match tokio::fs::remove_file(self.tile_path(id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.write_index(&state).await?;
        Ok(stale.len())
    }

    async fn put_session(&self, session: &DownloadSession) -> Result<(), DownloadError> {
        // Take the lock so session writes serialize with everything else.
        let _state = self.state().await?;
        let path = self
            .sessions_dir()
            .join(format!("{}.json", session.session_id));
        let contents = serde_json::to_string_pretty(session)?;
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    async fn get_session(
        &self,
        session_id: &str,
    ) -> Result<Option<DownloadSession>, DownloadError> {
        let _state = self.state().await?;
        let path = self.sessions_dir().join(format!("{}.json", session_id));
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tile(s: &str) -> TileId {
        TileId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn get_miss_is_none_not_error() {
        let dir = TempDir::new().unwrap();
        let store = DiskCacheStore::new(dir.path());
        assert!(store.get(&tile("N36W112")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn store_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = DiskCacheStore::new(dir.path());

        let id = tile("N36W112");
        store
            .store(CacheEntry::new(id, Bytes::from_static(b"payload"), true))
            .await
            .unwrap();

        let entry = store.get(&id).await.unwrap().unwrap();
        assert_eq!(entry.data.as_ref(), b"payload");
        assert_eq!(entry.size, 7);
        assert!(entry.compressed);
    }

    #[tokio::test]
    async fn store_overwrites_existing_id() {
        let dir = TempDir::new().unwrap();
        let store = DiskCacheStore::new(dir.path());

        let id = tile("N36W112");
        store
            .store(CacheEntry::new(id, Bytes::from_static(b"old"), true))
            .await
            .unwrap();
        store
            .store(CacheEntry::new(id, Bytes::from_static(b"newer"), false))
            .await
            .unwrap();

        let entry = store.get(&id).await.unwrap().unwrap();
        assert_eq!(entry.data.as_ref(), b"newer");
        assert!(!entry.compressed);
        assert_eq!(store.all_tiles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn index_survives_a_new_store_instance() {
        let dir = TempDir::new().unwrap();
        let id = tile("N42E013");

        {
            let store = DiskCacheStore::new(dir.path());
            store
                .store(CacheEntry::new(id, Bytes::from_static(b"abc"), true))
                .await
                .unwrap();
        }

        let reopened = DiskCacheStore::new(dir.path());
        let entry = reopened.get(&id).await.unwrap().unwrap();
        assert_eq!(entry.data.as_ref(), b"abc");
    }

    #[tokio::test]
    async fn reads_refresh_last_accessed() {
        let dir = TempDir::new().unwrap();
        let store = DiskCacheStore::new(dir.path());

        let id = tile("N36W112");
        let mut entry = CacheEntry::new(id, Bytes::from_static(b"x"), true);
        entry.last_accessed = Utc::now() - Duration::days(30);
        store.store(entry).await.unwrap();

        let fetched = store.get(&id).await.unwrap().unwrap();
        assert!(Utc::now() - fetched.last_accessed < Duration::seconds(5));

        // The refreshed stamp protects the entry from pruning.
        assert_eq!(store.prune_older_than(7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn prune_removes_only_stale_entries() {
        let dir = TempDir::new().unwrap();
        let store = DiskCacheStore::new(dir.path());

        let stale_id = tile("N10E010");
        let mut stale = CacheEntry::new(stale_id, Bytes::from_static(b"old"), true);
        stale.last_accessed = Utc::now() - Duration::days(30);
        store.store(stale).await.unwrap();

        let fresh_id = tile("N11E011");
        store
            .store(CacheEntry::new(fresh_id, Bytes::from_static(b"new"), true))
            .await
            .unwrap();

        assert_eq!(store.prune_older_than(7).await.unwrap(), 1);
        assert_eq!(store.all_tiles().await.unwrap(), vec![fresh_id]);
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let dir = TempDir::new().unwrap();
        let store = DiskCacheStore::new(dir.path());

        store
            .store(CacheEntry::new(
                tile("N36W112"),
                Bytes::from_static(b"x"),
                true,
            ))
            .await
            .unwrap();
        store.clear().await.unwrap();

        assert!(store.all_tiles().await.unwrap().is_empty());
        assert_eq!(store.storage_info().await.unwrap(), StorageInfo::default());
    }

    #[tokio::test]
    async fn storage_info_aggregates_entries() {
        let dir = TempDir::new().unwrap();
        let store = DiskCacheStore::new(dir.path());

        store
            .store(CacheEntry::new(
                tile("N36W112"),
                Bytes::from_static(b"aaaa"),
                true,
            ))
            .await
            .unwrap();
        store
            .store(CacheEntry::new(
                tile("N36W113"),
                Bytes::from_static(b"bb"),
                true,
            ))
            .await
            .unwrap();

        let info = store.storage_info().await.unwrap();
        assert_eq!(info.tile_count, 2);
        assert_eq!(info.total_size, 6);
        assert!(info.oldest.is_some() && info.newest.is_some());
    }

    #[tokio::test]
    async fn sessions_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let store = DiskCacheStore::new(dir.path());

        let session = DownloadSession::new(vec![tile("N36W112")]);
        store.put_session(&session).await.unwrap();

        let loaded = store
            .get_session(&session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.session_id, session.session_id);
        assert!(store.get_session("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = DiskCacheStore::new(dir.path());
        assert!(!store.is_initialized().await);
        store.init().await.unwrap();
        store.init().await.unwrap();
        assert!(store.is_initialized().await);
    }
}
