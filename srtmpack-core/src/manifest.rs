//! Download session manifests
//!
//! A manifest records one `start_download` invocation: the planned tiles,
//! per-tile outcomes, and coarse progress. It is persisted best-effort to the
//! cache store so finished and interrupted sessions can be inspected later.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tile::TileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Planning,
    Downloading,
    /// Reserved; never produced by `start_download`.
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Failed
        )
    }

    /// Status transitions are monotone, except paused <-> downloading.
    fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Planning, Downloading) => true,
            (Downloading, Paused) | (Paused, Downloading) => true,
            (Planning | Downloading | Paused, Completed | Cancelled | Failed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileFailure {
    pub reason: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProgress {
    pub bytes_downloaded: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSession {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    /// Planned tiles, in submission order.
    pub tiles: Vec<TileId>,
    pub completed: BTreeSet<TileId>,
    pub failed: BTreeMap<TileId, TileFailure>,
    pub skipped: BTreeSet<TileId>,
    pub status: SessionStatus,
    pub progress: SessionProgress,
}

/// Summary counters derived from a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_ms: i64,
    pub bytes_downloaded: u64,
}

impl DownloadSession {
    pub fn new(tiles: Vec<TileId>) -> Self {
        let now = Utc::now();
        Self {
            session_id: format!(
                "session-{}-{:04x}",
                now.format("%Y%m%d%H%M%S"),
                rand::random::<u16>()
            ),
            created_at: now,
            tiles,
            completed: BTreeSet::new(),
            failed: BTreeMap::new(),
            skipped: BTreeSet::new(),
            status: SessionStatus::Planning,
            progress: SessionProgress {
                bytes_downloaded: 0,
                started_at: now,
            },
        }
    }

    /// Record a tile delivered into the archive. A late success supersedes an
    /// earlier failure so `completed` and `failed` stay disjoint.
    pub fn mark_completed(&mut self, id: TileId) {
        self.failed.remove(&id);
        self.completed.insert(id);
    }

    pub fn mark_failed(&mut self, id: TileId, reason: impl Into<String>) {
        if self.completed.contains(&id) {
            return;
        }
        let entry = self.failed.entry(id).or_insert_with(|| TileFailure {
            reason: String::new(),
            attempts: 0,
        });
        entry.reason = reason.into();
        entry.attempts += 1;
    }

    /// Record an ocean tile (404 from the origin). Not an error.
    pub fn mark_skipped(&mut self, id: TileId) {
        self.skipped.insert(id);
    }

    /// Apply a status change if the transition is legal; illegal requests are
    /// dropped with a debug log.
    pub fn set_status(&mut self, status: SessionStatus) {
        if self.status.can_transition_to(status) {
            self.status = status;
        } else {
            log::debug!(
                "Ignoring illegal session status transition {:?} -> {:?}",
                self.status,
                status
            );
        }
    }

    pub fn add_bytes(&mut self, bytes: u64) {
        self.progress.bytes_downloaded += bytes;
    }

    pub fn statistics(&self) -> SessionStatistics {
        SessionStatistics {
            total: self.tiles.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
            skipped: self.skipped.len(),
            elapsed_ms: (Utc::now() - self.progress.started_at).num_milliseconds(),
            bytes_downloaded: self.progress.bytes_downloaded,
        }
    }

    /// True once every planned tile has a recorded outcome.
    pub fn is_settled(&self) -> bool {
        self.completed.len() + self.failed.len() + self.skipped.len() >= self.tiles.len()
    }
}
