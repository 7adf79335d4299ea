//! Wire format shared with the peer device.
//!
//! Records travel as flat camelCase JSON objects with epoch-second start
//! times. Optional fields are always written, as `null` when absent, and
//! default to `null` when missing so older and newer peers interoperate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{SessionTag, TagKind, WorkoutRecord};
use crate::sync::types::SyncError;

/// Current envelope version.
pub const WIRE_VERSION: u32 = 1;

/// A workout record as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    pub id: String,
    /// Seconds since the Unix epoch.
    pub started_at: i64,
    pub duration_seconds: u64,
    pub distance_meters: f64,
    pub energy_kilocalories: f64,
    pub carried_load_kilograms: f64,
    #[serde(default)]
    pub average_heart_rate: Option<f64>,
    #[serde(default)]
    pub program_id: Option<String>,
    #[serde(default)]
    pub program_day: Option<u32>,
    #[serde(default)]
    pub challenge_id: Option<String>,
    #[serde(default)]
    pub challenge_day: Option<u32>,
}

impl From<&WorkoutRecord> for WireRecord {
    fn from(record: &WorkoutRecord) -> Self {
        let (program, challenge) = match &record.tag {
            Some(tag) if tag.kind == TagKind::Program => (Some(tag), None),
            Some(tag) => (None, Some(tag)),
            None => (None, None),
        };
        Self {
            id: record.id.clone(),
            started_at: record.started_at_epoch(),
            duration_seconds: record.duration_seconds,
            distance_meters: record.distance_meters,
            energy_kilocalories: record.energy_kilocalories,
            carried_load_kilograms: record.carried_load_kilograms,
            average_heart_rate: record.average_heart_rate,
            program_id: program.map(|t| t.collection_id.clone()),
            program_day: program.map(|t| t.day),
            challenge_id: challenge.map(|t| t.collection_id.clone()),
            challenge_day: challenge.map(|t| t.day),
        }
    }
}

impl TryFrom<WireRecord> for WorkoutRecord {
    type Error = SyncError;

    fn try_from(wire: WireRecord) -> Result<Self, Self::Error> {
        let invalid = |reason: String| SyncError::InvalidRecord {
            id: wire.id.clone(),
            reason,
        };

        let tag = match (&wire.program_id, &wire.challenge_id) {
            (Some(_), Some(_)) => {
                return Err(invalid("both program and challenge set".into()));
            }
            (Some(id), None) => Some(SessionTag::program(
                id.clone(),
                wire.program_day
                    .ok_or_else(|| invalid("programId without programDay".into()))?,
            )),
            (None, Some(id)) => Some(SessionTag::challenge(
                id.clone(),
                wire.challenge_day
                    .ok_or_else(|| invalid("challengeId without challengeDay".into()))?,
            )),
            (None, None) => None,
        };

        let started_at = DateTime::<Utc>::from_timestamp(wire.started_at, 0)
            .ok_or_else(|| invalid(format!("startedAt {} out of range", wire.started_at)))?;

        let record = WorkoutRecord {
            id: wire.id.clone(),
            started_at,
            duration_seconds: wire.duration_seconds,
            distance_meters: wire.distance_meters,
            energy_kilocalories: wire.energy_kilocalories,
            carried_load_kilograms: wire.carried_load_kilograms,
            average_heart_rate: wire.average_heart_rate,
            tag,
        };
        record.validate().map_err(invalid)?;
        Ok(record)
    }
}

/// One element of a records batch.
///
/// Elements that do not parse as a [`WireRecord`] (a `null` distance, a
/// negative duration) are kept raw so the rest of the batch still applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireEntry {
    Record(WireRecord),
    Malformed(serde_json::Value),
}

impl WireEntry {
    /// The record id, if the element carries a string `id`.
    pub fn id(&self) -> Option<&str> {
        match self {
            WireEntry::Record(record) => Some(&record.id),
            WireEntry::Malformed(value) => value.get("id").and_then(serde_json::Value::as_str),
        }
    }
}

impl From<WireRecord> for WireEntry {
    fn from(record: WireRecord) -> Self {
        WireEntry::Record(record)
    }
}

impl TryFrom<WireEntry> for WorkoutRecord {
    type Error = SyncError;

    fn try_from(entry: WireEntry) -> Result<Self, Self::Error> {
        match entry {
            WireEntry::Record(wire) => WorkoutRecord::try_from(wire),
            WireEntry::Malformed(value) => {
                let id = value
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("<unknown>")
                    .to_string();
                let reason = match serde_json::from_value::<WireRecord>(value) {
                    Err(e) => e.to_string(),
                    Ok(_) => "unrecognized record".to_string(),
                };
                Err(SyncError::InvalidRecord { id, reason })
            }
        }
    }
}

/// Envelope for everything exchanged with the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub version: u32,
    /// Device id of the sender.
    pub sender: String,
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Records { records: Vec<WireEntry> },
    /// Ask the receiver for everything it has.
    BulkRequest,
}

impl SyncMessage {
    pub fn records(sender: &str, records: &[WorkoutRecord]) -> Self {
        Self {
            version: WIRE_VERSION,
            sender: sender.to_string(),
            body: MessageBody::Records {
                records: records
                    .iter()
                    .map(|r| WireEntry::Record(WireRecord::from(r)))
                    .collect(),
            },
        }
    }

    pub fn bulk_request(sender: &str) -> Self {
        Self {
            version: WIRE_VERSION,
            sender: sender.to_string(),
            body: MessageBody::BulkRequest,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SyncError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse an inbound payload. Records that fail to parse stay in the
    /// batch as [`WireEntry::Malformed`] and are rejected one by one.
    pub fn decode(payload: &[u8]) -> Result<Self, SyncError> {
        let message: SyncMessage = serde_json::from_slice(payload)?;
        if message.version != WIRE_VERSION {
            tracing::debug!(
                version = message.version,
                sender = %message.sender,
                "Peer speaks a different wire version"
            );
        }
        Ok(message)
    }
}
