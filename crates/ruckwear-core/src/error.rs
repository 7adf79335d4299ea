//! Storage and configuration error types for ruckwear-core.
//!
//! Session and sync errors live next to their modules.

use std::path::PathBuf;
use thiserror::Error;

/// Failures of the SQLite workout store.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Cannot open workout database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Workout query failed: {0}")]
    QueryFailed(String),

    /// Schema upgrade failed; the file was left at its previous version.
    #[error("Schema migration failed: {0}")]
    MigrationFailed(String),

    /// SQLite reported BUSY or LOCKED. Retrying may succeed.
    #[error("Workout database is busy")]
    Locked,

    #[error("Corrupt row for workout {id}: {message}")]
    CorruptRow { id: String, message: String },

    /// The blocking task running the write panicked or was cancelled
    #[error("Storage task failed: {0}")]
    TaskFailed(String),
}

/// Problems reading or changing `config.toml`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config at {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    #[error("Cannot write config to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(inner, _msg) => {
                if inner.code == rusqlite::ErrorCode::DatabaseLocked
                    || inner.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for DatabaseError {
    fn from(err: tokio::task::JoinError) -> Self {
        DatabaseError::TaskFailed(err.to_string())
    }
}
