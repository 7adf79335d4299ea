//! Cross-device workout replication.
//!
//! Finalized workouts are sent to the paired device when it is reachable
//! and queued when it is not. Records from the peer are merged into the
//! local store after similarity-based deduplication.

pub mod channel;
pub mod cursor;
pub mod dedup;
pub mod device_id;
pub mod messenger;
pub mod queue;
pub mod types;
pub mod wire;
pub mod worker;


pub use channel::CrossDeviceSyncChannel;
pub use cursor::{PeerCursor, SyncCursor};
pub use device_id::{get_or_create_device_id_at, DeviceIdError};
pub use messenger::{DeviceMessenger, MemoryMessenger, OutboxMessenger};
pub use queue::OutboundQueue;
pub use types::{
    BulkScope, DedupWindow, IngestReport, RecordPublisher, SyncError, SyncSettings, SyncStatus,
};
pub use wire::{MessageBody, SyncMessage, WireEntry, WireRecord, WIRE_VERSION};
pub use worker::SyncHandle;
