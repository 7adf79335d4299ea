use thiserror::Error;

use super::state::SessionPhase;
use crate::error::DatabaseError;
use crate::record::WorkoutRecord;

/// Errors surfaced to callers of the session controller.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The command does not apply in the current phase. Nothing changed.
    #[error("cannot {action} while the session is {from}")]
    InvalidTransition {
        from: SessionPhase,
        action: &'static str,
    },

    /// Carried load was negative or not a number. Nothing changed.
    #[error("invalid carried load: {0} kg")]
    InvalidLoad(f64),

    /// The store refused the finalized record twice. The record is handed
    /// back so the caller can keep it.
    #[error("workout {} could not be saved: {source}", .record.id)]
    PersistenceFailure {
        record: Box<WorkoutRecord>,
        #[source]
        source: DatabaseError,
    },

    /// The controller task has shut down.
    #[error("session controller is not running")]
    ControllerStopped,
}

impl SessionError {
    /// The unsaved record, if this is a persistence failure.
    pub fn unsaved_record(&self) -> Option<&WorkoutRecord> {
        match self {
            SessionError::PersistenceFailure { record, .. } => Some(record),
            _ => None,
        }
    }
}

/// Failures of the platform telemetry service.
///
/// None of these abort a session; the controller logs them and keeps
/// tracking on the clock alone.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("telemetry unavailable: {0}")]
    Unavailable(String),

    #[error("failed to open telemetry session: {0}")]
    OpenFailed(String),

    #[error("failed to close telemetry session: {0}")]
    CloseFailed(String),

    #[error("telemetry did not respond within {timeout_secs} seconds")]
    TimedOut { timeout_secs: u64 },

    /// The service dropped the completion without answering.
    #[error("telemetry service went away")]
    Disconnected,
}
