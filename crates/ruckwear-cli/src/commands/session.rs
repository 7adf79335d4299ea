//! Interactive session runner.
//!
//! Reads one command per line from stdin:
//!
//! ```text
//! pause | resume | status | end | abandon
//! sample <distance_m> <energy_kcal> [heart_rate]
//! peer up | peer down
//! ```
//!
//! Samples stand in for the sensor feed a watch would provide, `peer` lines
//! for the paired device coming and going. While the peer is up, finished
//! workouts are written to `<data dir>/outbox`. End of input ends the session.

use std::sync::{Arc, Mutex};

use clap::Subcommand;
use ruckwear_core::session::{
    completed, SessionError, TelemetryCompletion, TelemetryConfig, TelemetryError,
    TelemetryHandle, TelemetrySample, TelemetryService, TelemetrySink, WorkoutSessionController,
};
use ruckwear_core::storage::{data_dir, SqliteWorkoutStore};
use ruckwear_core::sync::{CrossDeviceSyncChannel, OutboxMessenger, SyncHandle};
use ruckwear_core::{Config, RecordPublisher};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::TagArgs;

#[derive(Subcommand)]
pub enum SessionAction {
    /// Start a session and read commands from stdin
    Start {
        /// Carried load in kilograms
        #[arg(long)]
        load: f64,
        #[command(flatten)]
        tag: TagArgs,
    },
}

const FEED: &str = "stdin";

/// Telemetry fed by `sample` lines. Stdin is a single feed, so only one
/// session can hold it.
#[derive(Default)]
struct ManualTelemetry {
    sink: Mutex<Option<TelemetrySink>>,
}

impl ManualTelemetry {
    fn push(&self, sample: TelemetrySample) -> bool {
        match self.sink.lock() {
            Ok(sink) => sink.as_ref().is_some_and(|s| s.send(sample)),
            Err(_) => false,
        }
    }
}

impl TelemetryService for ManualTelemetry {
    fn open_session(
        &self,
        _config: TelemetryConfig,
        sink: TelemetrySink,
    ) -> TelemetryCompletion<TelemetryHandle> {
        let Ok(mut slot) = self.sink.lock() else {
            return completed(Err(TelemetryError::OpenFailed("feed lock poisoned".into())));
        };
        if slot.is_some() {
            return completed(Err(TelemetryError::OpenFailed(
                "stdin feed already attached".into(),
            )));
        }
        *slot = Some(sink);
        completed(Ok(TelemetryHandle(FEED.into())))
    }

    fn suspend(&self, _handle: &TelemetryHandle) {}

    fn resume(&self, _handle: &TelemetryHandle) {}

    fn close_session(&self, handle: TelemetryHandle) -> TelemetryCompletion<()> {
        if handle.0 != FEED {
            return completed(Err(TelemetryError::CloseFailed(format!(
                "unknown handle {}",
                handle.0
            ))));
        }
        match self.sink.lock().map(|mut slot| slot.take()) {
            Ok(Some(_)) => completed(Ok(())),
            Ok(None) => completed(Err(TelemetryError::CloseFailed("feed not attached".into()))),
            Err(_) => completed(Err(TelemetryError::CloseFailed("feed lock poisoned".into()))),
        }
    }
}

enum Line {
    Pause,
    Resume,
    Status,
    End,
    Abandon,
    Sample(TelemetrySample),
    Peer(bool),
}

fn parse_line(line: &str) -> Result<Line, String> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or_default();
    if command == "peer" {
        return match parts.next() {
            Some("up") => Ok(Line::Peer(true)),
            Some("down") => Ok(Line::Peer(false)),
            _ => Err("peer needs up or down".to_string()),
        };
    }
    let mut number = |name: &str| -> Result<Option<f64>, String> {
        parts
            .next()
            .map(|v| v.parse::<f64>().map_err(|_| format!("invalid {name}: {v}")))
            .transpose()
    };

    match command {
        "pause" => Ok(Line::Pause),
        "resume" => Ok(Line::Resume),
        "status" => Ok(Line::Status),
        "end" => Ok(Line::End),
        "abandon" => Ok(Line::Abandon),
        "sample" => {
            let distance = number("distance")?.ok_or("sample needs a distance")?;
            let energy = number("energy")?.ok_or("sample needs an energy figure")?;
            let heart_rate = number("heart rate")?;
            Ok(Line::Sample(TelemetrySample {
                distance_meters: Some(distance),
                base_energy_kcal: Some(energy),
                heart_rate_bpm: heart_rate,
            }))
        }
        other => Err(format!("unknown command: {other}")),
    }
}

pub fn run(action: SessionAction, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let SessionAction::Start { load, tag } = action;
    let tag = tag.session_tag()?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_session(load, tag, config))
}

async fn run_session(
    load: f64,
    tag: Option<ruckwear_core::SessionTag>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = data_dir()?;
    let store = Arc::new(SqliteWorkoutStore::open()?);
    let channel = CrossDeviceSyncChannel::open(
        &dir,
        config.sync_settings(),
        store.clone(),
        Arc::new(OutboxMessenger::new(dir.join("outbox"))),
    )?;
    let (sync, worker) = SyncHandle::spawn(channel)?;

    let telemetry = Arc::new(ManualTelemetry::default());
    let publisher: Arc<dyn RecordPublisher> = Arc::new(sync.clone());
    let controller = WorkoutSessionController::spawn(
        config.controller_config(),
        telemetry.clone(),
        store,
        Some(publisher),
    );

    let started = match tag {
        Some(tag) => controller.start_tagged(load, tag).await,
        None => controller.start(load).await,
    };
    let outcome = match started {
        Ok(()) => {
            println!("started: {load} kg");
            drive(&controller, &telemetry, &sync).await
        }
        Err(e) => Err(e.into()),
    };

    sync.shutdown().await;
    if worker.join().is_err() {
        tracing::error!("Sync worker panicked");
    }
    outcome
}

async fn drive(
    controller: &WorkoutSessionController,
    telemetry: &ManualTelemetry,
    sync: &SyncHandle,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let command = match parse_line(line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let result = match command {
            Line::Pause => controller.pause().await.map(|_| println!("paused")),
            Line::Resume => controller.resume().await.map(|_| println!("resumed")),
            Line::Status => {
                println!("{}", serde_json::to_string(&controller.snapshot())?);
                Ok(())
            }
            Line::Sample(sample) => {
                if !telemetry.push(sample) {
                    eprintln!("no telemetry session open");
                }
                Ok(())
            }
            Line::Peer(reachable) => {
                sync.reachability_changed(reachable);
                Ok(())
            }
            Line::Abandon => {
                controller.abandon().await?;
                println!("abandoned");
                return Ok(());
            }
            Line::End => return finish(controller).await,
        };
        if let Err(e) = result {
            eprintln!("{e}");
        }
    }

    finish(controller).await
}

async fn finish(controller: &WorkoutSessionController) -> Result<(), Box<dyn std::error::Error>> {
    match controller.end().await {
        Ok(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Err(SessionError::PersistenceFailure { record, source }) => {
            // Still print it so nothing is lost.
            println!("{}", serde_json::to_string_pretty(&record)?);
            Err(format!("workout not saved: {source}").into())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_lines_parse() {
        assert!(matches!(parse_line("peer up"), Ok(Line::Peer(true))));
        assert!(matches!(parse_line("peer down"), Ok(Line::Peer(false))));
        assert!(parse_line("peer sideways").is_err());
    }

    #[test]
    fn sample_line_needs_energy() {
        assert!(parse_line("sample 100").is_err());
        assert!(matches!(parse_line("sample 100 5 120"), Ok(Line::Sample(_))));
    }

    #[test]
    fn closing_a_detached_feed_fails() {
        let telemetry = ManualTelemetry::default();

        let mut done = telemetry.close_session(TelemetryHandle(FEED.into()));
        assert!(matches!(done.try_recv(), Ok(Err(TelemetryError::CloseFailed(_)))));

        let mut done = telemetry.close_session(TelemetryHandle("other".into()));
        assert!(matches!(done.try_recv(), Ok(Err(TelemetryError::CloseFailed(_)))));
    }
}
