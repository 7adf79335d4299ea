//! Per-peer replication bookkeeping, persisted across restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

const CURSOR_FILE: &str = "sync_cursor.json";

/// How many merged ids are remembered per peer.
pub const MERGED_ID_CAPACITY: usize = 64;

/// What this device knows about one peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerCursor {
    /// Ids most recently merged from the peer, newest last.
    #[serde(default)]
    pub merged_ids: VecDeque<String>,
    /// Latest `started_at` successfully sent to the peer.
    #[serde(default)]
    pub watermark: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_exchange_at: Option<DateTime<Utc>>,
    /// Set while the peer is unreachable.
    #[serde(default)]
    pub disconnected_since: Option<DateTime<Utc>>,
}

impl PeerCursor {
    pub fn note_merged(&mut self, record_id: &str) {
        if self.was_merged(record_id) {
            return;
        }
        self.merged_ids.push_back(record_id.to_string());
        while self.merged_ids.len() > MERGED_ID_CAPACITY {
            self.merged_ids.pop_front();
        }
    }

    pub fn was_merged(&self, record_id: &str) -> bool {
        self.merged_ids.iter().any(|id| id == record_id)
    }

    /// Advance the watermark past records the peer now holds.
    pub fn note_sent(&mut self, newest_started_at: Option<DateTime<Utc>>, at: DateTime<Utc>) {
        self.watermark = self.watermark.max(newest_started_at);
        self.last_exchange_at = Some(at);
    }
}

/// Cursors for every peer this device has talked to.
#[derive(Debug, Default)]
pub struct SyncCursor {
    peers: HashMap<String, PeerCursor>,
    path: Option<PathBuf>,
}

impl SyncCursor {
    /// Load `sync_cursor.json` from `dir`, starting empty if it is missing.
    pub fn load_from_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let path = dir.join(CURSOR_FILE);
        let peers = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            peers,
            path: Some(path),
        })
    }

    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn peer(&self, peer_id: &str) -> PeerCursor {
        self.peers.get(peer_id).cloned().unwrap_or_default()
    }

    pub fn peer_mut(&mut self, peer_id: &str) -> &mut PeerCursor {
        self.peers.entry(peer_id.to_string()).or_default()
    }

    pub fn persist(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let data = serde_json::to_string_pretty(&self.peers)?;
        std::fs::write(path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 7, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn merged_ids_are_bounded() {
        let mut cursor = PeerCursor::default();
        for i in 0..(MERGED_ID_CAPACITY + 10) {
            cursor.note_merged(&format!("w-{i}"));
        }
        cursor.note_merged("w-12");
        assert_eq!(cursor.merged_ids.len(), MERGED_ID_CAPACITY);
        assert!(!cursor.was_merged("w-0"));
        assert!(cursor.was_merged(&format!("w-{}", MERGED_ID_CAPACITY + 9)));
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let mut cursor = PeerCursor::default();
        cursor.note_sent(Some(at(30)), at(31));
        cursor.note_sent(Some(at(10)), at(40));
        assert_eq!(cursor.watermark, Some(at(30)));
        assert_eq!(cursor.last_exchange_at, Some(at(40)));
    }

    #[test]
    fn persists_per_peer() {
        let temp_dir = TempDir::new().unwrap();
        let mut cursor = SyncCursor::load_from_dir(temp_dir.path()).unwrap();
        cursor.peer_mut("watch").note_merged("w-1");
        cursor.persist().unwrap();

        let reloaded = SyncCursor::load_from_dir(temp_dir.path()).unwrap();
        assert!(reloaded.peer("watch").was_merged("w-1"));
        assert_eq!(reloaded.peer("phone"), PeerCursor::default());
    }
}
