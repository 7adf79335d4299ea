//! The CLI acts as the transport: `export` prints what would go to the peer,
//! `import` applies what came back.

use std::sync::Arc;

use clap::Subcommand;
use ruckwear_core::storage::{data_dir, SqliteWorkoutStore};
use ruckwear_core::sync::{BulkScope, CrossDeviceSyncChannel, IngestReport, MemoryMessenger};
use ruckwear_core::Config;

#[derive(Subcommand)]
pub enum SyncAction {
    /// Flush queued records to stdout, one sync message per line
    Export {
        /// Send every stored record, not just the queue
        #[arg(long)]
        all: bool,
    },
    /// Apply sync messages from a file written by `export` on the peer
    Import {
        /// File with one sync message per line
        file: std::path::PathBuf,
    },
    /// Print a message asking the peer for everything it holds
    Request,
    /// Show queue and cursor state
    Status,
}

fn open_channel(
    config: &Config,
    messenger: Arc<MemoryMessenger>,
) -> Result<CrossDeviceSyncChannel, Box<dyn std::error::Error>> {
    let store = Arc::new(SqliteWorkoutStore::open()?);
    Ok(CrossDeviceSyncChannel::open(
        &data_dir()?,
        config.sync_settings(),
        store,
        messenger,
    )?)
}

pub fn run(action: SyncAction, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let messenger = Arc::new(MemoryMessenger::new());
    let mut channel = open_channel(config, messenger.clone())?;

    match action {
        SyncAction::Export { all } => {
            let mut sent = channel.reachability_changed(true)?;
            if all {
                sent += channel.bulk_exchange(BulkScope::All)?;
            }
            for (_, payload) in messenger.take_sent() {
                println!("{}", String::from_utf8(payload)?);
            }
            if sent == 0 {
                eprintln!("nothing to export");
            }
        }
        SyncAction::Import { file } => {
            let content = std::fs::read_to_string(&file)?;
            let mut total = IngestReport::default();
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let report = channel.on_receive(line.as_bytes())?;
                total.received += report.received;
                total.merged += report.merged;
                total.duplicates += report.duplicates;
                total.rejected += report.rejected;
                total.failed += report.failed;
                total.answered += report.answered;
            }
            println!("{}", serde_json::to_string_pretty(&total)?);
        }
        SyncAction::Request => {
            channel.request_bulk()?;
            for (_, payload) in messenger.take_sent() {
                println!("{}", String::from_utf8(payload)?);
            }
        }
        SyncAction::Status => {
            println!("{}", serde_json::to_string_pretty(&channel.status())?);
        }
    }
    Ok(())
}
