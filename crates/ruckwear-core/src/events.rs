use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::SessionTag;

/// Every lifecycle change of a session produces an Event.
/// The UI subscribes to them; the CLI prints them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    SessionStarted {
        load_kg: f64,
        tag: Option<SessionTag>,
        at: DateTime<Utc>,
    },
    SessionPaused {
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    SessionResumed {
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    /// The telemetry session opened and samples may now arrive.
    TelemetryConnected {
        at: DateTime<Utc>,
    },
    /// Telemetry failed; tracking continues on the clock alone.
    TelemetryDegraded {
        reason: String,
        at: DateTime<Utc>,
    },
    /// `end` was accepted; the clock is stopped and totals are frozen.
    SessionFinalizing {
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    SessionFinalized {
        record_id: String,
        /// False when the store refused the record twice.
        saved: bool,
        at: DateTime<Utc>,
    },
    SessionAbandoned {
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
}
