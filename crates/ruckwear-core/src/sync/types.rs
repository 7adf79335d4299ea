//! Core types for cross-device workout replication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device_id::DeviceIdError;
use crate::error::DatabaseError;
use crate::record::WorkoutRecord;

/// Anything that accepts finalized records for replication.
///
/// The session controller hands every finalized record here; implementations
/// must not block.
pub trait RecordPublisher: Send + Sync {
    fn publish(&self, record: &WorkoutRecord);
}

/// Tolerances for deciding that a peer record is one we already have.
///
/// Two records match when their start times differ by less than
/// `start_tolerance_secs` AND their durations by less than
/// `duration_tolerance_secs`. Both bounds are strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupWindow {
    pub start_tolerance_secs: u64,
    pub duration_tolerance_secs: u64,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self {
            start_tolerance_secs: 60,
            duration_tolerance_secs: 10,
        }
    }
}

/// Tunables for [`CrossDeviceSyncChannel`](super::CrossDeviceSyncChannel).
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// The one peer this device replicates with.
    pub peer_id: String,
    pub window: DedupWindow,
    /// A reconnect after a disconnection at least this long also sends
    /// every record newer than the peer's watermark.
    pub bulk_after_disconnect: chrono::Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            peer_id: "companion".into(),
            window: DedupWindow::default(),
            bulk_after_disconnect: chrono::Duration::hours(6),
        }
    }
}

/// Which records a bulk exchange carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkScope {
    /// Every locally stored record.
    All,
    /// Only records that started after the last one the peer acknowledged.
    SinceCursor,
}

/// Outcome of ingesting one inbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub received: usize,
    pub merged: usize,
    pub duplicates: usize,
    pub rejected: usize,
    /// Valid records the local store could not take.
    pub failed: usize,
    /// Records sent back in answer to a bulk request.
    pub answered: usize,
}

/// Current sync status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub device_id: String,
    pub peer_id: String,
    pub reachable: bool,
    /// Records waiting for the peer.
    pub pending_count: usize,
    /// Last successful send to or receive from the peer.
    pub last_exchange_at: Option<DateTime<Utc>>,
    /// Latest `started_at` the peer is known to hold.
    pub watermark: Option<DateTime<Utc>>,
}

/// Sync error types.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("Send to {peer_id} failed: {message}")]
    Send { peer_id: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Device id error: {0}")]
    DeviceId(#[from] DeviceIdError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The sync worker thread has exited.
    #[error("Sync worker is not running")]
    WorkerStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window_is_a_minute_and_ten_seconds() {
        let window = DedupWindow::default();
        assert_eq!(window.start_tolerance_secs, 60);
        assert_eq!(window.duration_tolerance_secs, 10);
    }

    #[test]
    fn sync_error_messages_name_the_record() {
        let err = SyncError::InvalidRecord {
            id: "w-9".into(),
            reason: "both program and challenge set".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid record w-9: both program and challenge set"
        );
    }
}
