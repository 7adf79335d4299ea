mod config;
pub mod database;
pub mod migrations;

pub use config::{AthleteConfig, Config, LoggingConfig, SessionConfig, SyncConfig};
pub use database::{SqliteWorkoutStore, WorkoutStore, WorkoutTotals};

use std::path::PathBuf;

use crate::error::ConfigError;

/// Returns the data directory, creating it if needed.
///
/// `RUCKWEAR_DATA_DIR` wins when set. Otherwise `~/.config/ruckwear[-dev]/`
/// based on `RUCKWEAR_ENV` (set it to `dev` for the development directory).
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("RUCKWEAR_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env =
                std::env::var("RUCKWEAR_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("ruckwear-dev")
            } else {
                base_dir.join("ruckwear")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
