//! Session state owned by the controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;

use super::error::SessionError;
use super::telemetry::{TelemetryHandle, TelemetrySample};
use crate::clock::SessionClock;
use crate::record::{SessionTag, WorkoutRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Active,
    Paused,
    Finalizing,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Active => "active",
            SessionPhase::Paused => "paused",
            SessionPhase::Finalizing => "finalizing",
        };
        f.write_str(name)
    }
}

/// What observers see after every recompute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: SessionPhase,
    pub elapsed_active_seconds: u64,
    pub distance_meters: f64,
    pub energy_kilocalories: f64,
    pub heart_rate: Option<f64>,
    pub carried_load_kilograms: f64,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            state: SessionPhase::Idle,
            elapsed_active_seconds: 0,
            distance_meters: 0.0,
            energy_kilocalories: 0.0,
            heart_rate: None,
            carried_load_kilograms: 0.0,
        }
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

/// Totals merged from telemetry so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningTotals {
    pub distance_meters: f64,
    pub base_energy_kcal: f64,
    /// Load-adjusted; refreshed by the controller on every recompute.
    pub energy_kcal: f64,
    /// Latest reading, for display.
    pub heart_rate: Option<f64>,
    base_energy_reported: bool,
    heart_rate_sum: f64,
    heart_rate_samples: u64,
}

impl RunningTotals {
    /// Merge a sample. Distance and base energy replace the previous value;
    /// heart rate replaces the display value and feeds the average.
    ///
    /// Returns the number of fields accepted. Negative or non-finite fields
    /// are dropped.
    pub fn apply(&mut self, sample: &TelemetrySample) -> usize {
        let mut accepted = 0;
        if let Some(distance) = sample.distance_meters.filter(|v| usable(*v)) {
            self.distance_meters = distance;
            accepted += 1;
        }
        if let Some(energy) = sample.base_energy_kcal.filter(|v| usable(*v)) {
            self.base_energy_kcal = energy;
            self.base_energy_reported = true;
            accepted += 1;
        }
        if let Some(bpm) = sample.heart_rate_bpm.filter(|v| usable(*v)) {
            self.heart_rate = Some(bpm);
            self.heart_rate_sum += bpm;
            self.heart_rate_samples += 1;
            accepted += 1;
        }
        accepted
    }

    /// Whether telemetry has reported any energy yet. Until it has there is
    /// nothing for the load adjustment to build on.
    pub fn has_base_energy(&self) -> bool {
        self.base_energy_reported
    }

    /// Mean of every accepted heart-rate sample.
    pub fn average_heart_rate(&self) -> Option<f64> {
        if self.heart_rate_samples == 0 {
            return None;
        }
        Some(self.heart_rate_sum / self.heart_rate_samples as f64)
    }
}

fn usable(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

/// Where the telemetry session stands.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TelemetryLink {
    /// `open_session` was called and has not answered yet. `suspended`
    /// records a pause that must be applied once it does.
    Opening { suspended: bool },
    Open(TelemetryHandle),
    /// Degraded: clock-only tracking for the rest of the session.
    Unavailable,
}

/// Everything the controller tracks for one session.
#[derive(Debug)]
pub(crate) struct ActiveSession {
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    pub load_kg: f64,
    pub tag: Option<SessionTag>,
    pub clock: SessionClock,
    pub totals: RunningTotals,
    pub telemetry: TelemetryLink,
}

impl ActiveSession {
    pub fn snapshot(&self, state: SessionPhase) -> SessionSnapshot {
        SessionSnapshot {
            state,
            elapsed_active_seconds: self.clock.elapsed_secs(),
            distance_meters: self.totals.distance_meters,
            energy_kilocalories: self.totals.energy_kcal,
            heart_rate: self.totals.heart_rate,
            carried_load_kilograms: self.load_kg,
        }
    }
}

/// A session whose clock has stopped, waiting on telemetry close.
#[derive(Debug)]
pub(crate) struct FinalizingSession {
    pub session: ActiveSession,
    pub active_time: Duration,
    pub reply: Option<oneshot::Sender<Result<WorkoutRecord, SessionError>>>,
}

/// The controller's state. Exactly one per controller, never shared.
#[derive(Debug, Default)]
pub(crate) enum SessionState {
    #[default]
    Idle,
    Active(ActiveSession),
    Paused(ActiveSession),
    Finalizing(FinalizingSession),
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Active(_) => SessionPhase::Active,
            SessionState::Paused(_) => SessionPhase::Paused,
            SessionState::Finalizing(_) => SessionPhase::Finalizing,
        }
    }

    /// The live session, if one is running or paused.
    pub fn live_mut(&mut self) -> Option<&mut ActiveSession> {
        match self {
            SessionState::Active(s) | SessionState::Paused(s) => Some(s),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        match self {
            SessionState::Idle => SessionSnapshot::idle(),
            SessionState::Active(s) => s.snapshot(SessionPhase::Active),
            SessionState::Paused(s) => s.snapshot(SessionPhase::Paused),
            SessionState::Finalizing(f) => SessionSnapshot {
                elapsed_active_seconds: f.active_time.as_secs(),
                ..f.session.snapshot(SessionPhase::Finalizing)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_and_energy_replace_rather_than_sum() {
        let mut totals = RunningTotals::default();
        totals.apply(&TelemetrySample::new(400.0, 30.0));
        totals.apply(&TelemetrySample::new(800.0, 55.0));
        assert_eq!(totals.distance_meters, 800.0);
        assert_eq!(totals.base_energy_kcal, 55.0);
        assert!(totals.has_base_energy());
    }

    #[test]
    fn heart_rate_is_latest_for_display_and_averaged() {
        let mut totals = RunningTotals::default();
        assert_eq!(totals.average_heart_rate(), None);
        totals.apply(&TelemetrySample::heart_rate(120.0));
        totals.apply(&TelemetrySample::heart_rate(140.0));
        assert_eq!(totals.heart_rate, Some(140.0));
        assert_eq!(totals.average_heart_rate(), Some(130.0));
        assert!(!totals.has_base_energy());
    }

    #[test]
    fn missing_fields_leave_previous_values() {
        let mut totals = RunningTotals::default();
        totals.apply(&TelemetrySample::new(400.0, 30.0));
        let accepted = totals.apply(&TelemetrySample::heart_rate(99.0));
        assert_eq!(accepted, 1);
        assert_eq!(totals.distance_meters, 400.0);
        assert_eq!(totals.base_energy_kcal, 30.0);
    }

    #[test]
    fn bad_values_are_dropped() {
        let mut totals = RunningTotals::default();
        let sample = TelemetrySample {
            distance_meters: Some(-3.0),
            base_energy_kcal: Some(f64::INFINITY),
            heart_rate_bpm: Some(f64::NAN),
        };
        assert_eq!(totals.apply(&sample), 0);
        assert_eq!(totals, RunningTotals::default());
    }

    #[test]
    fn phase_display_is_lowercase() {
        assert_eq!(SessionPhase::Finalizing.to_string(), "finalizing");
        assert_eq!(SessionState::default().phase(), SessionPhase::Idle);
    }
}
