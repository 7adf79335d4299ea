use clap::{Parser, Subcommand};
use ruckwear_core::logging::{init_logging, LogConfig};
use ruckwear_core::Config;

mod commands;

#[derive(Parser)]
#[command(name = "ruckwear", version, about = "Ruckwear CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a workout
    Session {
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
    /// Stored workouts
    History {
        #[command(subcommand)]
        action: commands::history::HistoryAction,
    },
    /// Totals over a date range
    Stats(commands::stats::StatsArgs),
    /// Replication with the paired device
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = Config::load_or_default();
    // A second subscriber can only come from tests; ignore it.
    let _ = init_logging(&LogConfig::from(&config.logging));

    let result = match cli.command {
        Commands::Session { action } => commands::session::run(action, &config),
        Commands::History { action } => commands::history::run(action),
        Commands::Stats(args) => commands::stats::run(args),
        Commands::Sync { action } => commands::sync::run(action, &config),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
