use clap::Args;
use ruckwear_core::storage::{SqliteWorkoutStore, WorkoutStore};

use super::RangeArgs;

#[derive(Args)]
pub struct StatsArgs {
    #[command(flatten)]
    range: RangeArgs,
}

pub fn run(args: StatsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteWorkoutStore::open()?;
    let totals = store.totals(args.range.to_range()?)?;
    println!("{}", serde_json::to_string_pretty(&totals)?);
    Ok(())
}
