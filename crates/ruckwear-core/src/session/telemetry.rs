//! Contract with the platform telemetry service.
//!
//! The service is a black box that, once a session is open, pushes
//! cumulative distance, cumulative base energy and instantaneous heart rate
//! from whatever thread it likes. Everything it delivers goes through a
//! [`TelemetrySink`], which forwards into the controller's command queue.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use super::controller::Command;
use super::error::TelemetryError;

/// One callback's worth of sensor data. Any field may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Cumulative distance for the session window.
    pub distance_meters: Option<f64>,
    /// Cumulative platform energy estimate, before load adjustment.
    pub base_energy_kcal: Option<f64>,
    /// Instantaneous heart rate.
    pub heart_rate_bpm: Option<f64>,
}

impl TelemetrySample {
    pub fn new(distance_meters: f64, base_energy_kcal: f64) -> Self {
        Self {
            distance_meters: Some(distance_meters),
            base_energy_kcal: Some(base_energy_kcal),
            heart_rate_bpm: None,
        }
    }

    pub fn heart_rate(bpm: f64) -> Self {
        Self {
            heart_rate_bpm: Some(bpm),
            ..Self::default()
        }
    }
}

/// What the controller asks for when it opens a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub activity: String,
    pub carried_load_kg: f64,
}

impl TelemetryConfig {
    pub fn ruck(carried_load_kg: f64) -> Self {
        Self {
            activity: "ruck".into(),
            carried_load_kg,
        }
    }
}

/// Opaque handle the service hands back from `open_session`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TelemetryHandle(pub String);

/// Asynchronous answer from the service.
pub type TelemetryCompletion<T> = oneshot::Receiver<Result<T, TelemetryError>>;

/// Build an already-resolved completion.
pub fn completed<T>(result: Result<T, TelemetryError>) -> TelemetryCompletion<T> {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(result);
    rx
}

/// The platform telemetry service.
pub trait TelemetryService: Send + Sync {
    /// Start collecting. Samples go to `sink` until the session is closed.
    fn open_session(
        &self,
        config: TelemetryConfig,
        sink: TelemetrySink,
    ) -> TelemetryCompletion<TelemetryHandle>;

    fn suspend(&self, handle: &TelemetryHandle);

    fn resume(&self, handle: &TelemetryHandle);

    fn close_session(&self, handle: TelemetryHandle) -> TelemetryCompletion<()>;
}

/// Where the service delivers samples. Cheap to clone, safe from any thread.
///
/// A sink is bound to the session that opened it: samples sent after that
/// session ended are dropped by the controller.
#[derive(Clone, Debug)]
pub struct TelemetrySink {
    generation: u64,
    tx: mpsc::WeakUnboundedSender<Command>,
}

impl TelemetrySink {
    pub(crate) fn new(generation: u64, tx: mpsc::WeakUnboundedSender<Command>) -> Self {
        Self { generation, tx }
    }

    /// Forward a sample. Returns false once the controller is gone.
    pub fn send(&self, sample: TelemetrySample) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx
                .send(Command::Sample {
                    generation: self.generation,
                    sample,
                })
                .is_ok(),
            None => false,
        }
    }
}

/// A service for devices with no sensors: every open fails, so sessions run
/// on the clock alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableTelemetry;

impl TelemetryService for UnavailableTelemetry {
    fn open_session(
        &self,
        _config: TelemetryConfig,
        _sink: TelemetrySink,
    ) -> TelemetryCompletion<TelemetryHandle> {
        completed(Err(TelemetryError::Unavailable(
            "no telemetry source on this device".into(),
        )))
    }

    fn suspend(&self, _handle: &TelemetryHandle) {}

    fn resume(&self, _handle: &TelemetryHandle) {}

    fn close_session(&self, _handle: TelemetryHandle) -> TelemetryCompletion<()> {
        completed(Ok(()))
    }
}
