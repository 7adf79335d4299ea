//! Runs a [`CrossDeviceSyncChannel`] on its own thread.
//!
//! Store and messenger calls block, and platform callbacks must return
//! immediately, so every request is a message to a dedicated worker.

use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::channel::CrossDeviceSyncChannel;
use super::types::{BulkScope, IngestReport, RecordPublisher, SyncError, SyncStatus};
use crate::record::WorkoutRecord;

enum WorkerCommand {
    Publish(WorkoutRecord),
    Receive {
        payload: Vec<u8>,
        reply: Option<oneshot::Sender<Result<IngestReport, SyncError>>>,
    },
    Reachability(bool),
    Bulk(BulkScope),
    Status(oneshot::Sender<SyncStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable, fire-and-forget front end to the sync worker.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl SyncHandle {
    /// Move `channel` onto a new worker thread.
    pub fn spawn(channel: CrossDeviceSyncChannel) -> Result<(Self, JoinHandle<()>), SyncError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = thread::Builder::new()
            .name("ruckwear-sync".into())
            .spawn(move || run(channel, rx))?;
        Ok((Self { tx }, worker))
    }

    /// Inbound payload from the messaging channel. Never blocks.
    pub fn on_receive(&self, payload: Vec<u8>) {
        self.send(WorkerCommand::Receive {
            payload,
            reply: None,
        });
    }

    /// Inbound payload, resolving once it has been applied.
    pub async fn receive(&self, payload: Vec<u8>) -> Result<IngestReport, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerCommand::Receive {
                payload,
                reply: Some(reply),
            })
            .map_err(|_| SyncError::WorkerStopped)?;
        rx.await.map_err(|_| SyncError::WorkerStopped)?
    }

    pub fn reachability_changed(&self, reachable: bool) {
        self.send(WorkerCommand::Reachability(reachable));
    }

    pub fn bulk_exchange(&self, scope: BulkScope) {
        self.send(WorkerCommand::Bulk(scope));
    }

    pub async fn status(&self) -> Result<SyncStatus, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerCommand::Status(reply))
            .map_err(|_| SyncError::WorkerStopped)?;
        rx.await.map_err(|_| SyncError::WorkerStopped)
    }

    /// Stop the worker once everything already sent has been handled.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(WorkerCommand::Shutdown(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, command: WorkerCommand) {
        if self.tx.send(command).is_err() {
            debug!("Sync worker already stopped");
        }
    }
}

impl RecordPublisher for SyncHandle {
    fn publish(&self, record: &WorkoutRecord) {
        self.send(WorkerCommand::Publish(record.clone()));
    }
}

fn run(mut channel: CrossDeviceSyncChannel, mut rx: mpsc::UnboundedReceiver<WorkerCommand>) {
    info!(device_id = %channel.device_id(), "Sync worker started");

    while let Some(command) = rx.blocking_recv() {
        match command {
            WorkerCommand::Publish(record) => {
                if let Err(e) = channel.publish(&record) {
                    error!(error = %e, record_id = %record.id, "Failed to publish record");
                }
            }
            WorkerCommand::Receive { payload, reply } => {
                let result = channel.on_receive(&payload);
                if let Err(e) = &result {
                    error!(error = %e, "Failed to apply sync message");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            WorkerCommand::Reachability(reachable) => {
                if let Err(e) = channel.reachability_changed(reachable) {
                    error!(error = %e, reachable, "Failed to handle reachability change");
                }
            }
            WorkerCommand::Bulk(scope) => {
                if let Err(e) = channel.bulk_exchange(scope) {
                    error!(error = %e, ?scope, "Bulk exchange failed");
                }
            }
            WorkerCommand::Status(reply) => {
                let _ = reply.send(channel.status());
            }
            WorkerCommand::Shutdown(reply) => {
                let _ = reply.send(());
                break;
            }
        }
    }

    info!("Sync worker stopped");
}
