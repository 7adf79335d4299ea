//! Finalized workout records and the tags that attach them to training plans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which kind of external plan a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Program,
    Challenge,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Program => "program",
            TagKind::Challenge => "challenge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "program" => Some(TagKind::Program),
            "challenge" => Some(TagKind::Challenge),
            _ => None,
        }
    }
}

/// Association between a session and a day of a program or challenge.
///
/// A record carries at most one tag, so a session can never belong to a
/// program and a challenge at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionTag {
    pub kind: TagKind,
    pub collection_id: String,
    pub day: u32,
}

impl SessionTag {
    pub fn program(collection_id: impl Into<String>, day: u32) -> Self {
        Self {
            kind: TagKind::Program,
            collection_id: collection_id.into(),
            day,
        }
    }

    pub fn challenge(collection_id: impl Into<String>, day: u32) -> Self {
        Self {
            kind: TagKind::Challenge,
            collection_id: collection_id.into(),
            day,
        }
    }
}

/// A completed session. Immutable once produced by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    pub id: String,
    /// Whole-second precision.
    pub started_at: DateTime<Utc>,
    pub duration_seconds: u64,
    pub distance_meters: f64,
    pub energy_kilocalories: f64,
    pub carried_load_kilograms: f64,
    pub average_heart_rate: Option<f64>,
    pub tag: Option<SessionTag>,
}

impl WorkoutRecord {
    /// Check the numeric invariants every stored record must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id is empty".into());
        }
        check_non_negative("distance_meters", self.distance_meters)?;
        check_non_negative("energy_kilocalories", self.energy_kilocalories)?;
        check_non_negative("carried_load_kilograms", self.carried_load_kilograms)?;
        if let Some(hr) = self.average_heart_rate {
            check_non_negative("average_heart_rate", hr)?;
        }
        Ok(())
    }

    pub fn started_at_epoch(&self) -> i64 {
        self.started_at.timestamp()
    }
}

fn check_non_negative(field: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(format!("{field} must be a non-negative number, got {value}"))
    }
}

/// Inclusive `started_at` window used by history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn between(from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            until: Some(until),
        }
    }
}
