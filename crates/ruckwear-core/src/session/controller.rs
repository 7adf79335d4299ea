//! Workout session controller.
//!
//! The controller is a Tokio task that owns the session state. Every input
//! (user commands, telemetry samples, telemetry open/close completions and
//! clock polls) arrives as a message on one queue and is handled to
//! completion before the next, so nothing else ever touches the totals.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Active <-> Paused
//! Active | Paused -> Finalizing -> Idle
//! Active | Paused -> Idle            (abandon)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let controller = WorkoutSessionController::spawn(config, telemetry, store, Some(publisher));
//! controller.start(9.0).await?;
//! // ... telemetry pushes samples through its sink ...
//! let record = controller.end().await?;
//! ```

use chrono::{SubsecRound, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{SessionError, TelemetryError};
use super::state::{
    ActiveSession, FinalizingSession, RunningTotals, SessionPhase, SessionSnapshot, SessionState,
    TelemetryLink,
};
use super::telemetry::{
    TelemetryConfig, TelemetryHandle, TelemetrySample, TelemetryService, TelemetrySink,
};
use crate::calories;
use crate::clock::SessionClock;
use crate::error::DatabaseError;
use crate::events::SessionEvent;
use crate::record::{SessionTag, WorkoutRecord};
use crate::storage::WorkoutStore;
use crate::sync::RecordPublisher;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Zero disables the load adjustment.
    pub body_weight_kg: f64,
    /// Upper bound on waiting for the telemetry service to open or close.
    pub telemetry_close_timeout: Duration,
    /// How often the clock is polled for ticks while active.
    pub clock_poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            body_weight_kg: 80.0,
            telemetry_close_timeout: Duration::from_secs(10),
            clock_poll_interval: Duration::from_millis(250),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Messages into the controller's loop.
#[derive(Debug)]
pub(crate) enum Command {
    Start {
        load_kg: f64,
        tag: Option<SessionTag>,
        reply: Reply<()>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    End {
        reply: Reply<WorkoutRecord>,
    },
    Abandon {
        reply: Reply<()>,
    },
    Sample {
        generation: u64,
        sample: TelemetrySample,
    },
    TelemetryOpened {
        generation: u64,
        result: Result<TelemetryHandle, TelemetryError>,
    },
    TelemetryClosed {
        generation: u64,
        result: Result<(), TelemetryError>,
    },
}

/// Handle to a running controller. Clones share the same session.
#[derive(Clone)]
pub struct WorkoutSessionController {
    tx: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl WorkoutSessionController {
    /// Spawn the controller loop on the current Tokio runtime.
    ///
    /// The loop exits once every handle is dropped.
    pub fn spawn(
        config: ControllerConfig,
        telemetry: Arc<dyn TelemetryService>,
        store: Arc<dyn WorkoutStore>,
        publisher: Option<Arc<dyn RecordPublisher>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshots) = watch::channel(SessionSnapshot::idle());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let actor = SessionActor {
            config,
            telemetry,
            store,
            publisher,
            state: SessionState::Idle,
            next_generation: 0,
            tx: tx.downgrade(),
            snapshot_tx,
            events: events.clone(),
        };
        tokio::spawn(actor.run(rx));

        Self {
            tx,
            snapshots,
            events,
        }
    }

    /// Begin a session carrying `load_kg`.
    pub async fn start(&self, load_kg: f64) -> Result<(), SessionError> {
        self.request(|reply| Command::Start {
            load_kg,
            tag: None,
            reply,
        })
        .await
    }

    /// Begin a session attached to a program or challenge day.
    pub async fn start_tagged(&self, load_kg: f64, tag: SessionTag) -> Result<(), SessionError> {
        self.request(|reply| Command::Start {
            load_kg,
            tag: Some(tag),
            reply,
        })
        .await
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Finish the session and return the saved record.
    ///
    /// Resolves once the record is persisted, which may take up to the
    /// telemetry close timeout. A storage failure after one retry comes back
    /// as [`SessionError::PersistenceFailure`] carrying the record.
    pub async fn end(&self) -> Result<WorkoutRecord, SessionError> {
        self.request(|reply| Command::End { reply }).await
    }

    /// Drop the current session without producing a record.
    pub async fn abandon(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Abandon { reply }).await
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| SessionError::ControllerStopped)?;
        rx.await.map_err(|_| SessionError::ControllerStopped)?
    }
}

struct SessionActor {
    config: ControllerConfig,
    telemetry: Arc<dyn TelemetryService>,
    store: Arc<dyn WorkoutStore>,
    publisher: Option<Arc<dyn RecordPublisher>>,
    state: SessionState,
    next_generation: u64,
    /// Weak so the loop ends when the last handle goes away.
    tx: mpsc::WeakUnboundedSender<Command>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut poll = tokio::time::interval(self.config.clock_poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let ticking = matches!(self.state, SessionState::Active(_));
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = poll.tick(), if ticking => self.on_clock_poll(),
            }
        }

        if self.state.phase() != SessionPhase::Idle {
            warn!(state = %self.state.phase(), "Session controller dropped with a session in progress");
        }
        debug!("Session controller stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Start {
                load_kg,
                tag,
                reply,
            } => {
                let _ = reply.send(self.start(load_kg, tag));
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            Command::Abandon { reply } => {
                let _ = reply.send(self.abandon());
            }
            Command::End { reply } => self.end(reply).await,
            Command::Sample { generation, sample } => self.on_sample(generation, sample),
            Command::TelemetryOpened { generation, result } => {
                self.on_telemetry_opened(generation, result)
            }
            Command::TelemetryClosed { generation, result } => {
                self.finalize(generation, result).await
            }
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    fn start(&mut self, load_kg: f64, tag: Option<SessionTag>) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Idle) {
            return Err(self.invalid("start"));
        }
        if !load_kg.is_finite() || load_kg < 0.0 {
            return Err(SessionError::InvalidLoad(load_kg));
        }

        self.next_generation += 1;
        let generation = self.next_generation;

        let mut clock = SessionClock::new();
        clock.start();

        self.state = SessionState::Active(ActiveSession {
            generation,
            started_at: Utc::now().trunc_subsecs(0),
            load_kg,
            tag: tag.clone(),
            clock,
            totals: RunningTotals::default(),
            telemetry: TelemetryLink::Opening { suspended: false },
        });

        self.open_telemetry(generation, load_kg);

        info!(load_kg, generation, "Session started");
        self.emit(SessionEvent::SessionStarted {
            load_kg,
            tag,
            at: Utc::now(),
        });
        self.recompute_derived();
        Ok(())
    }

    fn pause(&mut self) -> Result<(), SessionError> {
        match std::mem::take(&mut self.state) {
            SessionState::Active(mut session) => {
                session.clock.pause();
                match &mut session.telemetry {
                    TelemetryLink::Open(handle) => self.telemetry.suspend(handle),
                    TelemetryLink::Opening { suspended } => *suspended = true,
                    TelemetryLink::Unavailable => {}
                }
                let elapsed_secs = session.clock.elapsed_secs();
                self.state = SessionState::Paused(session);

                info!(elapsed_secs, "Session paused");
                self.emit(SessionEvent::SessionPaused {
                    elapsed_secs,
                    at: Utc::now(),
                });
                self.recompute_derived();
                Ok(())
            }
            paused @ SessionState::Paused(_) => {
                self.state = paused;
                Ok(())
            }
            other => {
                self.state = other;
                Err(self.invalid("pause"))
            }
        }
    }

    fn resume(&mut self) -> Result<(), SessionError> {
        match std::mem::take(&mut self.state) {
            SessionState::Paused(mut session) => {
                session.clock.resume();
                match &mut session.telemetry {
                    TelemetryLink::Open(handle) => self.telemetry.resume(handle),
                    TelemetryLink::Opening { suspended } => *suspended = false,
                    TelemetryLink::Unavailable => {}
                }
                let elapsed_secs = session.clock.elapsed_secs();
                self.state = SessionState::Active(session);

                info!(elapsed_secs, "Session resumed");
                self.emit(SessionEvent::SessionResumed {
                    elapsed_secs,
                    at: Utc::now(),
                });
                self.recompute_derived();
                Ok(())
            }
            active @ SessionState::Active(_) => {
                self.state = active;
                Ok(())
            }
            other => {
                self.state = other;
                Err(self.invalid("resume"))
            }
        }
    }

    fn abandon(&mut self) -> Result<(), SessionError> {
        match std::mem::take(&mut self.state) {
            SessionState::Active(mut session) | SessionState::Paused(mut session) => {
                let elapsed_secs = session.clock.stop().as_secs();
                if let TelemetryLink::Open(handle) = session.telemetry {
                    // Nobody waits on this close.
                    drop(self.telemetry.close_session(handle));
                }
                info!(elapsed_secs, "Session abandoned");
                self.emit(SessionEvent::SessionAbandoned {
                    elapsed_secs,
                    at: Utc::now(),
                });
                self.publish_snapshot();
                Ok(())
            }
            other => {
                self.state = other;
                Err(self.invalid("abandon"))
            }
        }
    }

    async fn end(&mut self, reply: Reply<WorkoutRecord>) {
        let mut session = match std::mem::take(&mut self.state) {
            SessionState::Active(session) | SessionState::Paused(session) => session,
            other => {
                self.state = other;
                let _ = reply.send(Err(self.invalid("end")));
                return;
            }
        };

        let active_time = session.clock.stop();
        // The record carries this figure, so it matches the Finalizing snapshot.
        session.totals.energy_kcal = load_adjusted_energy(
            &session.totals,
            session.load_kg,
            self.config.body_weight_kg,
            active_time.as_secs_f64(),
        );
        let generation = session.generation;
        let link = std::mem::replace(&mut session.telemetry, TelemetryLink::Unavailable);

        self.state = SessionState::Finalizing(FinalizingSession {
            session,
            active_time,
            reply: Some(reply),
        });

        info!(elapsed_secs = active_time.as_secs(), "Session finalizing");
        self.emit(SessionEvent::SessionFinalizing {
            elapsed_secs: active_time.as_secs(),
            at: Utc::now(),
        });
        self.publish_snapshot();

        match link {
            TelemetryLink::Open(handle) => self.close_telemetry(generation, handle),
            // A pending open is closed when it answers; see on_telemetry_opened.
            TelemetryLink::Opening { .. } => {
                self.finalize(
                    generation,
                    Err(TelemetryError::Unavailable("session never opened".into())),
                )
                .await
            }
            TelemetryLink::Unavailable => self.finalize(generation, Ok(())).await,
        }
    }

    // ── Telemetry ────────────────────────────────────────────────────

    fn open_telemetry(&self, generation: u64, load_kg: f64) {
        let sink = TelemetrySink::new(generation, self.tx.clone());
        let completion = self
            .telemetry
            .open_session(TelemetryConfig::ruck(load_kg), sink);

        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let timeout = self.config.telemetry_close_timeout;
        tokio::spawn(async move {
            let result = await_completion(completion, timeout).await;
            let _ = tx.send(Command::TelemetryOpened { generation, result });
        });
    }

    fn close_telemetry(&self, generation: u64, handle: TelemetryHandle) {
        let completion = self.telemetry.close_session(handle);

        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let timeout = self.config.telemetry_close_timeout;
        tokio::spawn(async move {
            let result = await_completion(completion, timeout).await;
            let _ = tx.send(Command::TelemetryClosed { generation, result });
        });
    }

    fn on_telemetry_opened(
        &mut self,
        generation: u64,
        result: Result<TelemetryHandle, TelemetryError>,
    ) {
        let current = self
            .state
            .live_mut()
            .filter(|s| s.generation == generation && matches!(s.telemetry, TelemetryLink::Opening { .. }));

        let Some(session) = current else {
            // The session this open belonged to is already over.
            if let Ok(handle) = result {
                debug!(generation, "Closing telemetry opened for a finished session");
                drop(self.telemetry.close_session(handle));
            }
            return;
        };

        match result {
            Ok(handle) => {
                if let TelemetryLink::Opening { suspended: true } = session.telemetry {
                    self.telemetry.suspend(&handle);
                }
                session.telemetry = TelemetryLink::Open(handle);
                info!(generation, "Telemetry connected");
                self.emit(SessionEvent::TelemetryConnected { at: Utc::now() });
            }
            Err(e) => {
                session.telemetry = TelemetryLink::Unavailable;
                warn!(error = %e, generation, "Telemetry unavailable, tracking on clock only");
                self.emit(SessionEvent::TelemetryDegraded {
                    reason: e.to_string(),
                    at: Utc::now(),
                });
            }
        }
    }

    fn on_sample(&mut self, generation: u64, sample: TelemetrySample) {
        let Some(session) = self
            .state
            .live_mut()
            .filter(|s| s.generation == generation)
        else {
            debug!(generation, "Ignoring telemetry sample outside its session");
            return;
        };

        if session.totals.apply(&sample) == 0 {
            warn!(?sample, "Telemetry sample carried no usable values");
            return;
        }
        self.recompute_derived();
    }

    // ── Clock ────────────────────────────────────────────────────────

    fn on_clock_poll(&mut self) {
        let fired = match &mut self.state {
            SessionState::Active(session) => session.clock.tick().fired,
            _ => 0,
        };
        if fired > 0 {
            self.recompute_derived();
        }
    }

    // ── Finalization ─────────────────────────────────────────────────

    async fn finalize(&mut self, generation: u64, close: Result<(), TelemetryError>) {
        let finalizing = match std::mem::take(&mut self.state) {
            SessionState::Finalizing(f) if f.session.generation == generation => f,
            other => {
                self.state = other;
                debug!(generation, "Ignoring telemetry close for another session");
                return;
            }
        };

        if let Err(e) = &close {
            warn!(error = %e, "Telemetry did not close cleanly, finalizing with local totals");
        }

        let FinalizingSession {
            session,
            active_time,
            reply,
        } = finalizing;
        let record = Self::build_record(&session, active_time);

        let outcome = match self.persist(&record).await {
            Ok(()) => Ok(record.clone()),
            Err(source) => {
                error!(error = %source, record_id = %record.id, "Workout could not be saved");
                Err(SessionError::PersistenceFailure {
                    record: Box::new(record.clone()),
                    source,
                })
            }
        };

        if let Some(publisher) = &self.publisher {
            publisher.publish(&record);
        }

        self.state = SessionState::Idle;
        info!(
            record_id = %record.id,
            duration_secs = record.duration_seconds,
            distance_m = record.distance_meters,
            energy_kcal = record.energy_kilocalories,
            saved = outcome.is_ok(),
            "Session finalized"
        );
        self.emit(SessionEvent::SessionFinalized {
            record_id: record.id.clone(),
            saved: outcome.is_ok(),
            at: Utc::now(),
        });
        self.publish_snapshot();

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    /// Built from the totals frozen at `end`, never from later telemetry.
    fn build_record(session: &ActiveSession, active_time: Duration) -> WorkoutRecord {
        WorkoutRecord {
            id: Uuid::new_v4().to_string(),
            started_at: session.started_at,
            duration_seconds: active_time.as_secs(),
            distance_meters: session.totals.distance_meters,
            energy_kilocalories: session.totals.energy_kcal,
            carried_load_kilograms: session.load_kg,
            average_heart_rate: session.totals.average_heart_rate(),
            tag: session.tag.clone(),
        }
    }

    /// Write on the blocking pool, retrying once.
    async fn persist(&self, record: &WorkoutRecord) -> Result<(), DatabaseError> {
        match self.save_once(record).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(error = %first, record_id = %record.id, "Workout save failed, retrying once");
                self.save_once(record).await
            }
        }
    }

    async fn save_once(&self, record: &WorkoutRecord) -> Result<(), DatabaseError> {
        let store = Arc::clone(&self.store);
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.save(&record))
            .await
            .map_err(DatabaseError::from)?
            .map(|_| ())
    }

    // ── Publishing ───────────────────────────────────────────────────

    fn recompute_derived(&mut self) {
        let body_weight_kg = self.config.body_weight_kg;
        if let Some(session) = self.state.live_mut() {
            let elapsed = session.clock.elapsed().as_secs_f64();
            session.totals.energy_kcal =
                load_adjusted_energy(&session.totals, session.load_kg, body_weight_kg, elapsed);
        }
        self.publish_snapshot();
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.state.snapshot());
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn invalid(&self, action: &'static str) -> SessionError {
        let from = self.state.phase();
        debug!(%from, action, "Rejected session command");
        SessionError::InvalidTransition { from, action }
    }
}

/// Zero until telemetry has reported some energy.
fn load_adjusted_energy(
    totals: &RunningTotals,
    load_kg: f64,
    body_weight_kg: f64,
    elapsed_secs: f64,
) -> f64 {
    if !totals.has_base_energy() {
        return 0.0;
    }
    calories::estimate(totals.base_energy_kcal, load_kg, body_weight_kg, elapsed_secs)
}

async fn await_completion<T>(
    completion: super::telemetry::TelemetryCompletion<T>,
    timeout: Duration,
) -> Result<T, TelemetryError> {
    match tokio::time::timeout(timeout, completion).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(TelemetryError::Disconnected),
        Err(_) => Err(TelemetryError::TimedOut {
            timeout_secs: timeout.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_energy_until_telemetry_reports_some() {
        let mut totals = RunningTotals::default();
        assert_eq!(load_adjusted_energy(&totals, 9.0, 80.0, 600.0), 0.0);

        totals.apply(&TelemetrySample::new(1609.0, 120.0));
        let energy = load_adjusted_energy(&totals, 9.0, 80.0, 600.0);
        assert!((energy - 125.25).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn close_timeout_maps_to_timed_out() {
        let (_keep_open, completion) = oneshot::channel::<Result<(), TelemetryError>>();
        let result = await_completion(completion, Duration::from_secs(10)).await;
        assert_eq!(result, Err(TelemetryError::TimedOut { timeout_secs: 10 }));
    }

    #[tokio::test]
    async fn dropped_completion_is_disconnected() {
        let (tx, completion) = oneshot::channel::<Result<(), TelemetryError>>();
        drop(tx);
        let result = await_completion(completion, Duration::from_secs(10)).await;
        assert_eq!(result, Err(TelemetryError::Disconnected));
    }
}
