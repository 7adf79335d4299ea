//! # Ruckwear Core Library
//!
//! Core logic for tracking weighted-walk ("ruck") workouts on a wearable and
//! replicating them with a paired device. The `ruckwear` CLI is a thin layer
//! over this crate.
//!
//! ## Architecture
//!
//! - **Session controller**: a Tokio task that owns the live session, folds
//!   telemetry into running totals and finalizes a [`WorkoutRecord`]
//! - **Calories**: load-adjusted energy estimate on top of the platform's
//!   base figure
//! - **Storage**: SQLite workout store and TOML configuration
//! - **Sync**: queue-and-flush replication with similarity-based dedup
//!
//! ## Key Components
//!
//! - [`WorkoutSessionController`]: session state machine
//! - [`SessionClock`]: pause-aware active-time clock
//! - [`SqliteWorkoutStore`]: workout persistence
//! - [`CrossDeviceSyncChannel`]: peer replication

pub mod calories;
pub mod clock;
pub mod error;
pub mod events;
pub mod logging;
pub mod record;
pub mod session;
pub mod storage;
pub mod sync;

pub use clock::{ClockState, ClockTick, SessionClock};
pub use error::{ConfigError, DatabaseError};
pub use events::SessionEvent;
pub use record::{DateRange, SessionTag, TagKind, WorkoutRecord};
pub use session::{
    ControllerConfig, SessionError, SessionPhase, SessionSnapshot, TelemetryError,
    TelemetrySample, TelemetryService, TelemetrySink, WorkoutSessionController,
};
pub use storage::{Config, SqliteWorkoutStore, WorkoutStore, WorkoutTotals};
pub use sync::{CrossDeviceSyncChannel, RecordPublisher, SyncHandle};
