//! TOML-based application configuration.
//!
//! Stores:
//! - Athlete profile (body weight for the load adjustment)
//! - Session controller timing
//! - Peer sync settings and deduplication tolerances
//! - Logging level and format
//!
//! Configuration is stored at `<data dir>/config.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data_dir;
use crate::error::ConfigError;
use crate::logging::{LogFormat, LogLevel};
use crate::session::ControllerConfig;
use crate::sync::{DedupWindow, SyncSettings};

/// Athlete profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AthleteConfig {
    /// Zero means unknown and disables the load adjustment.
    #[serde(default = "default_body_weight_kg")]
    pub body_weight_kg: f64,
}

/// Session controller timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long `end` waits for the telemetry service to confirm close.
    #[serde(default = "default_telemetry_close_timeout_secs")]
    pub telemetry_close_timeout_secs: u64,
    /// How often the controller polls the session clock.
    #[serde(default = "default_clock_poll_interval_ms")]
    pub clock_poll_interval_ms: u64,
}

/// Peer replication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Identifier of the paired device on the messaging channel.
    #[serde(default = "default_peer_id")]
    pub peer_id: String,
    #[serde(default = "default_start_tolerance_secs")]
    pub start_tolerance_secs: u64,
    #[serde(default = "default_duration_tolerance_secs")]
    pub duration_tolerance_secs: u64,
    /// A reconnect after a longer outage also sends a cursor-bounded bulk exchange.
    #[serde(default = "default_bulk_after_disconnect_mins")]
    pub bulk_after_disconnect_mins: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data dir>/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub athlete: AthleteConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ten years. Larger values are clamped so the conversion cannot overflow.
const MAX_BULK_AFTER_DISCONNECT_MINS: u64 = 10 * 365 * 24 * 60;

// Default functions
fn default_body_weight_kg() -> f64 {
    80.0
}
fn default_telemetry_close_timeout_secs() -> u64 {
    10
}
fn default_clock_poll_interval_ms() -> u64 {
    250
}
fn default_peer_id() -> String {
    "companion".into()
}
fn default_start_tolerance_secs() -> u64 {
    60
}
fn default_duration_tolerance_secs() -> u64 {
    10
}
fn default_bulk_after_disconnect_mins() -> u64 {
    360
}

impl Default for AthleteConfig {
    fn default() -> Self {
        Self {
            body_weight_kg: default_body_weight_kg(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            telemetry_close_timeout_secs: default_telemetry_close_timeout_secs(),
            clock_poll_interval_ms: default_clock_poll_interval_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            peer_id: default_peer_id(),
            start_tolerance_secs: default_start_tolerance_secs(),
            duration_tolerance_secs: default_duration_tolerance_secs(),
            bulk_after_disconnect_mins: default_bulk_after_disconnect_mins(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(ConfigError::UnknownKey(key.to_string()));
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current
                    .as_object_mut()
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
                let existing = obj
                    .get(part)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current
                .get_mut(part)
                .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        }

        Err(ConfigError::UnknownKey(key.to_string()))
    }

    /// Location of the config file.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from disk or write and return the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, creating it with defaults if missing.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    /// # Errors
    ///
    /// Returns an error if the config cannot be serialized or written to disk.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit the field.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Settings for the session controller.
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            body_weight_kg: self.athlete.body_weight_kg,
            telemetry_close_timeout: Duration::from_secs(self.session.telemetry_close_timeout_secs),
            clock_poll_interval: Duration::from_millis(self.session.clock_poll_interval_ms.max(10)),
        }
    }

    /// Settings for the cross-device sync channel.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            peer_id: self.sync.peer_id.clone(),
            window: DedupWindow {
                start_tolerance_secs: self.sync.start_tolerance_secs,
                duration_tolerance_secs: self.sync.duration_tolerance_secs,
            },
            bulk_after_disconnect: chrono::Duration::minutes(
                self.sync.bulk_after_disconnect_mins.min(MAX_BULK_AFTER_DISCONNECT_MINS) as i64,
            ),
        }
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.athlete.body_weight_kg, 80.0);
        assert_eq!(parsed.sync.peer_id, "companion");
        assert_eq!(parsed.logging.level, LogLevel::Info);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let parsed: Config = toml::from_str("[athlete]\nbody_weight_kg = 72.5\n").unwrap();
        assert_eq!(parsed.athlete.body_weight_kg, 72.5);
        assert_eq!(parsed.session.telemetry_close_timeout_secs, 10);
        assert_eq!(parsed.sync.start_tolerance_secs, 60);
        assert_eq!(parsed.sync.duration_tolerance_secs, 10);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("sync.peer_id").as_deref(), Some("companion"));
        assert_eq!(cfg.get("session.clock_poll_interval_ms").as_deref(), Some("250"));
        assert!(cfg.get("sync.missing_key").is_none());
    }

    #[test]
    fn set_updates_nested_number() {
        let mut cfg = Config::default();
        cfg.set("athlete.body_weight_kg", "91.5").unwrap();
        assert_eq!(cfg.athlete.body_weight_kg, 91.5);
        cfg.set("session.telemetry_close_timeout_secs", "3").unwrap();
        assert_eq!(cfg.session.telemetry_close_timeout_secs, 3);
    }

    #[test]
    fn set_updates_enum_by_name() {
        let mut cfg = Config::default();
        cfg.set("logging.format", "json").unwrap();
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert!(cfg.set("logging.format", "yaml").is_err());
    }

    #[test]
    fn set_rejects_unknown_key() {
        let mut cfg = Config::default();
        assert!(matches!(
            cfg.set("athlete.height_cm", "180"),
            Err(ConfigError::UnknownKey(_))
        ));
    }

    #[test]
    fn set_rejects_invalid_number() {
        let mut cfg = Config::default();
        assert!(cfg.set("athlete.body_weight_kg", "heavy").is_err());
    }

    #[test]
    fn load_from_creates_default_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.athlete.body_weight_kg, 80.0);

        let mut changed = cfg.clone();
        changed.set("sync.peer_id", "watch-7").unwrap();
        changed.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().sync.peer_id, "watch-7");
    }

    #[test]
    fn controller_config_converts_units() {
        let cfg = Config::default();
        let controller = cfg.controller_config();
        assert_eq!(controller.telemetry_close_timeout, Duration::from_secs(10));
        assert_eq!(controller.clock_poll_interval, Duration::from_millis(250));
        let sync = cfg.sync_settings();
        assert_eq!(sync.window.start_tolerance_secs, 60);
        assert_eq!(sync.bulk_after_disconnect, chrono::Duration::minutes(360));
    }
}
