//! Outbound queue for records the peer has not received yet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::record::WorkoutRecord;

const QUEUE_FILE: &str = "sync_queue.json";

/// Queued record with the time it was queued.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingRecord {
    record: WorkoutRecord,
    queued_at: DateTime<Utc>,
}

/// Records waiting for the peer, keyed by id so a record is never queued
/// twice.
pub struct OutboundQueue {
    pending: HashMap<String, PendingRecord>,
    /// Persistent queue file path. `None` keeps the queue in memory only.
    queue_file: Option<PathBuf>,
}

impl OutboundQueue {
    /// Queue persisted as `sync_queue.json` under `dir`.
    pub fn in_dir(dir: &std::path::Path) -> Self {
        Self::new_with_path(dir.join(QUEUE_FILE))
    }

    pub fn new_with_path(path: PathBuf) -> Self {
        Self {
            pending: HashMap::new(),
            queue_file: Some(path),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            pending: HashMap::new(),
            queue_file: None,
        }
    }

    /// Queue a record. Re-queuing an id keeps its original position.
    pub fn enqueue(&mut self, record: WorkoutRecord) {
        let queued_at = self
            .pending
            .get(&record.id)
            .map_or_else(Utc::now, |p| p.queued_at);
        self.pending.insert(
            record.id.clone(),
            PendingRecord { record, queued_at },
        );
    }

    /// Take every queued record, oldest first.
    pub fn drain_all(&mut self) -> Vec<WorkoutRecord> {
        let mut drained: Vec<PendingRecord> = self.pending.drain().map(|(_, p)| p).collect();
        drained.sort_by(|a, b| {
            a.queued_at
                .cmp(&b.queued_at)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        drained.into_iter().map(|p| p.record).collect()
    }

    /// Put records back after a failed send.
    pub fn requeue(&mut self, records: Vec<WorkoutRecord>) {
        for record in records {
            self.enqueue(record);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Persist queue to disk.
    pub fn persist(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.queue_file else {
            return Ok(());
        };
        let data = serde_json::to_string_pretty(&self.pending)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Load queue from disk. A missing file is an empty queue.
    pub fn load(&mut self) -> Result<(), std::io::Error> {
        let Some(path) = &self.queue_file else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        self.pending = serde_json::from_str(&content)?;
        Ok(())
    }
}
