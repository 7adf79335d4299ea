//! Similarity-based duplicate detection.
//!
//! Records made on different devices get different ids, so the same walk
//! logged on both sides is only recognisable by its shape: nearly the same
//! start time and nearly the same duration.

use chrono::Duration;

use crate::error::DatabaseError;
use crate::record::{DateRange, WorkoutRecord};
use crate::storage::WorkoutStore;
use crate::sync::types::DedupWindow;

/// Keeps the store lookup window inside chrono's range.
const MAX_TOLERANCE_SECS: u64 = 366 * 24 * 60 * 60;

impl DedupWindow {
    /// Whether `a` and `b` describe the same session.
    pub fn matches(&self, a: &WorkoutRecord, b: &WorkoutRecord) -> bool {
        let start_delta = a.started_at_epoch().abs_diff(b.started_at_epoch());
        let duration_delta = a.duration_seconds.abs_diff(b.duration_seconds);
        start_delta < self.start_tolerance_secs && duration_delta < self.duration_tolerance_secs
    }

    /// The stored record `candidate` duplicates, if any. An exact id match
    /// always counts.
    pub fn find_in(
        &self,
        store: &dyn WorkoutStore,
        candidate: &WorkoutRecord,
    ) -> Result<Option<WorkoutRecord>, DatabaseError> {
        if let Some(existing) = store.get(&candidate.id)? {
            return Ok(Some(existing));
        }

        let tolerance = Duration::seconds(self.start_tolerance_secs.min(MAX_TOLERANCE_SECS) as i64);
        let (Some(from), Some(until)) = (
            candidate.started_at.checked_sub_signed(tolerance),
            candidate.started_at.checked_add_signed(tolerance),
        ) else {
            return Ok(None);
        };

        let nearby = store.fetch_all(Some(DateRange::between(from, until)))?;
        Ok(nearby.into_iter().find(|local| self.matches(local, candidate)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteWorkoutStore;
    use chrono::{TimeZone, Utc};

    fn record(id: &str, offset_secs: i64, duration_seconds: u64) -> WorkoutRecord {
        WorkoutRecord {
            id: id.into(),
            started_at: Utc.with_ymd_and_hms(2026, 3, 1, 7, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
            duration_seconds,
            distance_meters: 2000.0,
            energy_kilocalories: 150.0,
            carried_load_kilograms: 10.0,
            average_heart_rate: None,
            tag: None,
        }
    }

    #[test]
    fn close_start_and_duration_is_a_duplicate() {
        let window = DedupWindow::default();
        assert!(window.matches(&record("a", 0, 1800), &record("b", 30, 1805)));
        assert!(window.matches(&record("a", 30, 1805), &record("b", 0, 1800)));
    }

    #[test]
    fn far_start_is_distinct() {
        let window = DedupWindow::default();
        assert!(!window.matches(&record("a", 0, 1800), &record("b", 120, 1800)));
    }

    #[test]
    fn bounds_are_strict() {
        let window = DedupWindow::default();
        assert!(!window.matches(&record("a", 0, 1800), &record("b", 60, 1800)));
        assert!(!window.matches(&record("a", 0, 1800), &record("b", 0, 1810)));
        assert!(window.matches(&record("a", 0, 1800), &record("b", 59, 1809)));
    }

    #[test]
    fn window_is_configurable() {
        let window = DedupWindow {
            start_tolerance_secs: 300,
            duration_tolerance_secs: 60,
        };
        assert!(window.matches(&record("a", 0, 1800), &record("b", 240, 1850)));
    }

    #[test]
    fn find_in_store_by_similarity_and_by_id() {
        let store = SqliteWorkoutStore::open_memory().unwrap();
        store.save(&record("local", 0, 1800)).unwrap();
        let window = DedupWindow::default();

        let similar = window.find_in(&store, &record("peer", 30, 1805)).unwrap();
        assert_eq!(similar.map(|r| r.id).as_deref(), Some("local"));

        let same_id = window.find_in(&store, &record("local", 5000, 10)).unwrap();
        assert!(same_id.is_some());

        let distinct = window.find_in(&store, &record("peer", 120, 1800)).unwrap();
        assert!(distinct.is_none());
    }
}
