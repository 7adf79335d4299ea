//! Workout session lifecycle.
//!
//! [`WorkoutSessionController`] owns one session at a time, folds telemetry
//! into running totals, and turns a finished session into a persisted
//! [`WorkoutRecord`](crate::record::WorkoutRecord).

mod controller;
mod error;
mod state;
mod telemetry;

pub use controller::{ControllerConfig, WorkoutSessionController};
pub use error::{SessionError, TelemetryError};
pub use state::{RunningTotals, SessionPhase, SessionSnapshot};
pub use telemetry::{
    completed, TelemetryCompletion, TelemetryConfig, TelemetryHandle, TelemetrySample,
    TelemetryService, TelemetrySink, UnavailableTelemetry,
};
