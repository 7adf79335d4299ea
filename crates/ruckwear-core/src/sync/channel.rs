//! Replication of finalized workouts with the paired device.
//!
//! ## Flow
//!
//! ```text
//! publish(record) ──reachable──> send ──refused──┐
//!        └──unreachable──> OutboundQueue <───────┘
//!
//! reachability false -> true ──> one message: queue (+ bulk batch)
//!
//! on_receive(payload) ──> validate ──> dedup ──> store
//! ```
//!
//! The channel is synchronous and single-owner; [`SyncHandle`](super::SyncHandle)
//! runs it on a worker thread.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cursor::SyncCursor;
use super::device_id::get_or_create_device_id_at;
use super::messenger::DeviceMessenger;
use super::queue::OutboundQueue;
use super::types::{BulkScope, IngestReport, SyncError, SyncSettings, SyncStatus};
use super::wire::{MessageBody, SyncMessage};
use crate::record::{DateRange, WorkoutRecord};
use crate::storage::WorkoutStore;

pub struct CrossDeviceSyncChannel {
    device_id: String,
    settings: SyncSettings,
    store: Arc<dyn WorkoutStore>,
    messenger: Arc<dyn DeviceMessenger>,
    queue: OutboundQueue,
    cursor: SyncCursor,
    reachable: bool,
    /// A bulk exchange asked for while the peer was away.
    deferred_bulk: Option<BulkScope>,
}

impl CrossDeviceSyncChannel {
    /// Channel with in-memory queue and cursor.
    pub fn new(
        device_id: impl Into<String>,
        settings: SyncSettings,
        store: Arc<dyn WorkoutStore>,
        messenger: Arc<dyn DeviceMessenger>,
    ) -> Self {
        Self::with_state(
            device_id.into(),
            settings,
            store,
            messenger,
            OutboundQueue::in_memory(),
            SyncCursor::in_memory(),
        )
    }

    /// Channel whose device id, queue and cursor live under `dir`.
    pub fn open(
        dir: &Path,
        settings: SyncSettings,
        store: Arc<dyn WorkoutStore>,
        messenger: Arc<dyn DeviceMessenger>,
    ) -> Result<Self, SyncError> {
        let device_id = get_or_create_device_id_at(dir)?;
        let mut queue = OutboundQueue::in_dir(dir);
        queue.load()?;
        let cursor = SyncCursor::load_from_dir(dir)?;
        if !queue.is_empty() {
            info!(pending = queue.len(), "Loaded outbound sync queue");
        }
        Ok(Self::with_state(
            device_id, settings, store, messenger, queue, cursor,
        ))
    }

    fn with_state(
        device_id: String,
        settings: SyncSettings,
        store: Arc<dyn WorkoutStore>,
        messenger: Arc<dyn DeviceMessenger>,
        queue: OutboundQueue,
        cursor: SyncCursor,
    ) -> Self {
        Self {
            device_id,
            settings,
            store,
            messenger,
            queue,
            cursor,
            reachable: false,
            deferred_bulk: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    // ── Outbound ─────────────────────────────────────────────────────

    /// Send a finalized record now, or queue it until the peer is back.
    pub fn publish(&mut self, record: &WorkoutRecord) -> Result<(), SyncError> {
        if !self.reachable {
            debug!(record_id = %record.id, "Peer unreachable, queueing record");
            self.queue.enqueue(record.clone());
            self.queue.persist()?;
            return Ok(());
        }

        match self.send_records(std::slice::from_ref(record), Utc::now()) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, record_id = %record.id, "Send failed, queueing record");
                self.queue.enqueue(record.clone());
                self.queue.persist()?;
                Ok(())
            }
        }
    }

    pub fn reachability_changed(&mut self, reachable: bool) -> Result<usize, SyncError> {
        self.reachability_changed_at(reachable, Utc::now())
    }

    /// Track a reachability report. A false -> true transition makes exactly
    /// one flush attempt and returns how many records it sent.
    pub fn reachability_changed_at(
        &mut self,
        reachable: bool,
        now: DateTime<Utc>,
    ) -> Result<usize, SyncError> {
        let peer_id = self.settings.peer_id.clone();
        if reachable == self.reachable {
            // The first "unreachable" report after startup starts the clock.
            let cursor = self.cursor.peer_mut(&peer_id);
            if !reachable && cursor.disconnected_since.is_none() {
                cursor.disconnected_since = Some(now);
                self.cursor.persist()?;
            }
            return Ok(0);
        }
        self.reachable = reachable;

        if !reachable {
            info!(peer = %peer_id, "Peer unreachable");
            self.cursor.peer_mut(&peer_id).disconnected_since = Some(now);
            self.cursor.persist()?;
            return Ok(0);
        }

        let away = self
            .cursor
            .peer_mut(&peer_id)
            .disconnected_since
            .take()
            .map(|since| now - since);
        let long_absence = away.is_some_and(|away| away >= self.settings.bulk_after_disconnect);
        let bulk = self
            .deferred_bulk
            .take()
            .or(long_absence.then_some(BulkScope::SinceCursor));

        info!(
            peer = %peer_id,
            away_secs = away.map(|d| d.num_seconds()),
            pending = self.queue.len(),
            bulk = ?bulk,
            "Peer reachable, flushing"
        );
        self.flush(bulk, now)
    }

    /// Send every locally known record, or those past the peer's watermark,
    /// in one message. Deferred until the next reconnect when unreachable.
    pub fn bulk_exchange(&mut self, scope: BulkScope) -> Result<usize, SyncError> {
        if !self.reachable {
            debug!(?scope, "Peer unreachable, deferring bulk exchange");
            self.defer_bulk(scope);
            return Ok(0);
        }
        self.flush(Some(scope), Utc::now())
    }

    /// Remember a bulk exchange for the next reconnect. `All` wins.
    fn defer_bulk(&mut self, scope: BulkScope) {
        self.deferred_bulk = Some(match (self.deferred_bulk, scope) {
            (Some(BulkScope::All), _) | (_, BulkScope::All) => BulkScope::All,
            _ => BulkScope::SinceCursor,
        });
    }

    /// Ask the peer to send us everything it holds.
    pub fn request_bulk(&mut self) -> Result<(), SyncError> {
        let payload = SyncMessage::bulk_request(&self.device_id).encode()?;
        self.messenger.send(&self.settings.peer_id, &payload)
    }

    /// One message carrying the queue and, optionally, a bulk batch. Queued
    /// records go back on the queue if the send fails; a bulk batch that
    /// could not be read or sent is deferred to the next reconnect.
    fn flush(&mut self, bulk: Option<BulkScope>, now: DateTime<Utc>) -> Result<usize, SyncError> {
        // Read the store before touching the queue so a failed read loses nothing.
        let extra = match bulk {
            Some(scope) => match self.bulk_records(scope) {
                Ok(records) => records,
                Err(e) => {
                    warn!(error = %e, ?scope, "Bulk read failed, deferring bulk exchange");
                    self.defer_bulk(scope);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let queued = self.queue.drain_all();
        let mut batch = queued.clone();
        let already: HashSet<String> = batch.iter().map(|r| r.id.clone()).collect();
        batch.extend(extra.into_iter().filter(|r| !already.contains(&r.id)));

        if batch.is_empty() {
            return Ok(0);
        }

        match self.send_records(&batch, now) {
            Ok(()) => {
                self.queue.persist()?;
                info!(sent = batch.len(), queued = queued.len(), "Sync flush sent");
                Ok(batch.len())
            }
            Err(e) => {
                warn!(error = %e, pending = queued.len(), "Sync flush failed, keeping queue");
                self.queue.requeue(queued);
                if let Some(scope) = bulk {
                    self.defer_bulk(scope);
                }
                self.queue.persist()?;
                Ok(0)
            }
        }
    }

    fn bulk_records(&self, scope: BulkScope) -> Result<Vec<WorkoutRecord>, SyncError> {
        let peer = self.cursor.peer(&self.settings.peer_id);
        let range = match (scope, peer.watermark) {
            (BulkScope::SinceCursor, Some(watermark)) => Some(DateRange {
                from: Some(watermark + Duration::seconds(1)),
                until: None,
            }),
            _ => None,
        };

        let mut records = self.store.fetch_all(range)?;
        if scope == BulkScope::SinceCursor {
            // The peer sent these; no need to echo them back.
            records.retain(|r| !peer.was_merged(&r.id));
        }
        // Oldest first so a partial apply on the peer still advances in order.
        records.reverse();
        Ok(records)
    }

    fn send_records(&mut self, records: &[WorkoutRecord], now: DateTime<Utc>) -> Result<(), SyncError> {
        let payload = SyncMessage::records(&self.device_id, records).encode()?;
        self.messenger.send(&self.settings.peer_id, &payload)?;

        let newest = records.iter().map(|r| r.started_at).max();
        self.cursor
            .peer_mut(&self.settings.peer_id)
            .note_sent(newest, now);
        self.cursor.persist()?;
        Ok(())
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Apply a payload from the peer.
    pub fn on_receive(&mut self, payload: &[u8]) -> Result<IngestReport, SyncError> {
        let message = SyncMessage::decode(payload)?;
        let mut report = IngestReport::default();

        match message.body {
            MessageBody::BulkRequest => {
                info!(sender = %message.sender, "Peer requested bulk exchange");
                report.answered = self.bulk_exchange(BulkScope::All)?;
            }
            MessageBody::Records { records } => {
                report.received = records.len();
                for wire in records {
                    let record = match WorkoutRecord::try_from(wire) {
                        Ok(record) => record,
                        Err(e) => {
                            warn!(error = %e, sender = %message.sender, "Rejected peer record");
                            report.rejected += 1;
                            continue;
                        }
                    };
                    let record_id = record.id.clone();
                    match self.ingest(record) {
                        Ok(true) => report.merged += 1,
                        Ok(false) => report.duplicates += 1,
                        Err(e) => {
                            warn!(error = %e, record_id = %record_id, "Failed to store peer record");
                            report.failed += 1;
                        }
                    }
                }
                self.cursor
                    .peer_mut(&self.settings.peer_id)
                    .last_exchange_at = Some(Utc::now());
                self.cursor.persist()?;
            }
        }

        info!(
            sender = %message.sender,
            received = report.received,
            merged = report.merged,
            duplicates = report.duplicates,
            rejected = report.rejected,
            failed = report.failed,
            "Ingested sync message"
        );
        Ok(report)
    }

    /// Store `record` unless we already have it. Returns whether it was new.
    fn ingest(&mut self, record: WorkoutRecord) -> Result<bool, SyncError> {
        let peer_id = self.settings.peer_id.clone();
        if self.cursor.peer(&peer_id).was_merged(&record.id) {
            return Ok(false);
        }
        if let Some(local) = self.settings.window.find_in(self.store.as_ref(), &record)? {
            debug!(peer_record = %record.id, local_record = %local.id, "Duplicate peer record");
            return Ok(false);
        }

        self.store.save(&record)?;
        self.cursor
            .peer_mut(&peer_id)
            .note_merged(&record.id);
        Ok(true)
    }

    pub fn status(&self) -> SyncStatus {
        let peer = self.cursor.peer(&self.settings.peer_id);
        SyncStatus {
            device_id: self.device_id.clone(),
            peer_id: self.settings.peer_id.clone(),
            reachable: self.reachable,
            pending_count: self.queue.len(),
            last_exchange_at: peer.last_exchange_at,
            watermark: peer.watermark,
        }
    }
}
