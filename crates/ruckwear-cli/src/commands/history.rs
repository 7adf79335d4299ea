use clap::Subcommand;
use ruckwear_core::storage::{SqliteWorkoutStore, WorkoutStore};

use super::{RangeArgs, TagArgs};

#[derive(Subcommand)]
pub enum HistoryAction {
    /// List workouts, newest first
    List {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Workouts attached to a program or challenge
    Tag {
        #[command(flatten)]
        tag: TagArgs,
    },
    /// Delete every workout attached to a program or challenge
    Unenroll {
        #[command(flatten)]
        tag: TagArgs,
    },
}

pub fn run(action: HistoryAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteWorkoutStore::open()?;

    match action {
        HistoryAction::List { range } => {
            let records = store.fetch_all(range.to_range()?)?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        HistoryAction::Tag { tag } => {
            let (kind, id) = tag.collection()?;
            let records = store.fetch_by_tag(kind, id)?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        HistoryAction::Unenroll { tag } => {
            let (kind, id) = tag.collection()?;
            let deleted = store.delete_by_tag(kind, id)?;
            tracing::info!(kind = kind.as_str(), collection = id, deleted, "Unenrolled");
            println!("{}", serde_json::json!({ "deleted": deleted }));
        }
    }
    Ok(())
}
