//! SQLite-based workout storage.
//!
//! Provides persistent storage for:
//! - Finalized workout records, local and replicated from the peer
//! - Date-range and program/challenge queries (newest first)
//! - Aggregate totals over a date range

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{data_dir, migrations};
use crate::error::DatabaseError;
use crate::record::{DateRange, SessionTag, TagKind, WorkoutRecord};

/// Persistence boundary for finalized workouts.
///
/// Calls are synchronous. The session controller and the sync worker run
/// them off their own loops, so implementations may block on I/O.
pub trait WorkoutStore: Send + Sync {
    /// Store a record and return its id. Saving an id that already exists is a no-op.
    fn save(&self, record: &WorkoutRecord) -> Result<String, DatabaseError>;

    fn get(&self, id: &str) -> Result<Option<WorkoutRecord>, DatabaseError>;

    /// Records whose `started_at` falls in `range`, newest first.
    fn fetch_all(&self, range: Option<DateRange>) -> Result<Vec<WorkoutRecord>, DatabaseError>;

    /// Records tagged with the given program or challenge, newest first.
    fn fetch_by_tag(
        &self,
        kind: TagKind,
        collection_id: &str,
    ) -> Result<Vec<WorkoutRecord>, DatabaseError>;

    /// Remove every record tagged with the given program or challenge.
    fn delete_by_tag(&self, kind: TagKind, collection_id: &str) -> Result<usize, DatabaseError>;

    fn totals(&self, range: Option<DateRange>) -> Result<WorkoutTotals, DatabaseError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkoutTotals {
    pub workouts: u64,
    pub duration_seconds: u64,
    pub distance_meters: f64,
    pub energy_kilocalories: f64,
    pub load_kilogram_hours: f64,
}

/// SQLite database for workout storage.
pub struct SqliteWorkoutStore {
    conn: Mutex<Connection>,
}

type RawRow = (
    String,
    i64,
    i64,
    f64,
    f64,
    f64,
    Option<f64>,
    Option<String>,
    Option<String>,
    Option<i64>,
);

const SELECT_COLUMNS: &str = "id, started_at, duration_secs, distance_m, energy_kcal, load_kg,
        avg_heart_rate, tag_kind, tag_collection, tag_day";

impl SqliteWorkoutStore {
    /// Open the database at `<data dir>/ruckwear.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Self::open_at(&dir.join("ruckwear.db"))
    }

    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database (for tests and dry runs).
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-query leaves nothing half-written that SQLite didn't roll back.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn query_records<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<WorkoutRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(record_from_row(row?)?);
        }
        Ok(records)
    }
}

fn range_bounds(range: Option<DateRange>) -> (i64, i64) {
    let range = range.unwrap_or_default();
    (
        range.from.map_or(i64::MIN, |t| t.timestamp()),
        range.until.map_or(i64::MAX, |t| t.timestamp()),
    )
}

fn record_from_row(raw: RawRow) -> Result<WorkoutRecord, DatabaseError> {
    let (id, started, duration, distance, energy, load, hr, kind, collection, day) = raw;
    let corrupt = |message: &str| DatabaseError::CorruptRow {
        id: id.clone(),
        message: message.to_string(),
    };

    let started_at: DateTime<Utc> =
        DateTime::from_timestamp(started, 0).ok_or_else(|| corrupt("started_at out of range"))?;
    let duration_seconds = u64::try_from(duration).map_err(|_| corrupt("negative duration"))?;

    let tag = match (kind, collection, day) {
        (Some(kind), Some(collection_id), Some(day)) => Some(SessionTag {
            kind: TagKind::parse(&kind).ok_or_else(|| corrupt("unknown tag kind"))?,
            collection_id,
            day: u32::try_from(day).map_err(|_| corrupt("tag day out of range"))?,
        }),
        (None, None, None) => None,
        _ => return Err(corrupt("partial tag")),
    };

    Ok(WorkoutRecord {
        id,
        started_at,
        duration_seconds,
        distance_meters: distance,
        energy_kilocalories: energy,
        carried_load_kilograms: load,
        average_heart_rate: hr,
        tag,
    })
}

impl WorkoutStore for SqliteWorkoutStore {
    fn save(&self, record: &WorkoutRecord) -> Result<String, DatabaseError> {
        let duration = i64::try_from(record.duration_seconds)
            .map_err(|_| DatabaseError::QueryFailed("duration out of range".into()))?;
        let (kind, collection, day) = match &record.tag {
            Some(tag) => (
                Some(tag.kind.as_str()),
                Some(tag.collection_id.as_str()),
                Some(i64::from(tag.day)),
            ),
            None => (None, None, None),
        };

        self.conn().execute(
            "INSERT OR IGNORE INTO workouts
                (id, started_at, duration_secs, distance_m, energy_kcal, load_kg,
                 avg_heart_rate, tag_kind, tag_collection, tag_day)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                record.started_at_epoch(),
                duration,
                record.distance_meters,
                record.energy_kilocalories,
                record.carried_load_kilograms,
                record.average_heart_rate,
                kind,
                collection,
                day,
            ],
        )?;
        Ok(record.id.clone())
    }

    fn get(&self, id: &str) -> Result<Option<WorkoutRecord>, DatabaseError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM workouts WHERE id = ?1");
        Ok(self.query_records(&sql, params![id])?.into_iter().next())
    }

    fn fetch_all(&self, range: Option<DateRange>) -> Result<Vec<WorkoutRecord>, DatabaseError> {
        let (from, until) = range_bounds(range);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM workouts
             WHERE started_at >= ?1 AND started_at <= ?2
             ORDER BY started_at DESC, id ASC"
        );
        self.query_records(&sql, params![from, until])
    }

    fn fetch_by_tag(
        &self,
        kind: TagKind,
        collection_id: &str,
    ) -> Result<Vec<WorkoutRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM workouts
             WHERE tag_kind = ?1 AND tag_collection = ?2
             ORDER BY started_at DESC, id ASC"
        );
        self.query_records(&sql, params![kind.as_str(), collection_id])
    }

    fn delete_by_tag(&self, kind: TagKind, collection_id: &str) -> Result<usize, DatabaseError> {
        let deleted = self.conn().execute(
            "DELETE FROM workouts WHERE tag_kind = ?1 AND tag_collection = ?2",
            params![kind.as_str(), collection_id],
        )?;
        Ok(deleted)
    }

    fn totals(&self, range: Option<DateRange>) -> Result<WorkoutTotals, DatabaseError> {
        let (from, until) = range_bounds(range);
        let conn = self.conn();
        let row = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(duration_secs), 0),
                    COALESCE(SUM(distance_m), 0.0),
                    COALESCE(SUM(energy_kcal), 0.0),
                    COALESCE(SUM(load_kg * duration_secs / 3600.0), 0.0)
             FROM workouts
             WHERE started_at >= ?1 AND started_at <= ?2",
            params![from, until],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            },
        )?;

        Ok(WorkoutTotals {
            workouts: u64::try_from(row.0).unwrap_or(0),
            duration_seconds: u64::try_from(row.1).unwrap_or(0),
            distance_meters: row.2,
            energy_kilocalories: row.3,
            load_kilogram_hours: row.4,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, hour, 0, 0).unwrap()
    }

    fn record(id: &str, started_at: DateTime<Utc>, tag: Option<SessionTag>) -> WorkoutRecord {
        WorkoutRecord {
            id: id.into(),
            started_at,
            duration_seconds: 1800,
            distance_meters: 3000.0,
            energy_kilocalories: 250.0,
            carried_load_kilograms: 12.0,
            average_heart_rate: Some(128.5),
            tag,
        }
    }

    #[test]
    fn save_and_get_roundtrip() {
        let store = SqliteWorkoutStore::open_memory().unwrap();
        let r = record("a", at(6), Some(SessionTag::program("base-12", 3)));
        assert_eq!(store.save(&r).unwrap(), "a");
        assert_eq!(store.get("a").unwrap(), Some(r));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn save_is_idempotent_on_id() {
        let store = SqliteWorkoutStore::open_memory().unwrap();
        let r = record("a", at(6), None);
        store.save(&r).unwrap();
        store.save(&r).unwrap();
        assert_eq!(store.fetch_all(None).unwrap().len(), 1);
    }

    #[test]
    fn fetch_all_is_newest_first_and_range_filtered() {
        let store = SqliteWorkoutStore::open_memory().unwrap();
        store.save(&record("early", at(5), None)).unwrap();
        store.save(&record("late", at(9), None)).unwrap();
        store.save(&record("mid", at(7), None)).unwrap();

        let ids: Vec<_> = store
            .fetch_all(None)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["late", "mid", "early"]);

        let window = DateRange::between(at(6), at(7));
        let ids: Vec<_> = store
            .fetch_all(Some(window))
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["mid"]);
    }

    #[test]
    fn tag_queries_and_bulk_delete() {
        let store = SqliteWorkoutStore::open_memory().unwrap();
        store
            .save(&record("p1", at(5), Some(SessionTag::program("base-12", 1))))
            .unwrap();
        store
            .save(&record("p2", at(8), Some(SessionTag::program("base-12", 2))))
            .unwrap();
        store
            .save(&record("c1", at(6), Some(SessionTag::challenge("base-12", 1))))
            .unwrap();
        store.save(&record("free", at(7), None)).unwrap();

        let program = store.fetch_by_tag(TagKind::Program, "base-12").unwrap();
        assert_eq!(
            program.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["p2", "p1"]
        );

        assert_eq!(store.delete_by_tag(TagKind::Program, "base-12").unwrap(), 2);
        assert!(store.fetch_by_tag(TagKind::Program, "base-12").unwrap().is_empty());
        assert_eq!(store.fetch_by_tag(TagKind::Challenge, "base-12").unwrap().len(), 1);
        assert_eq!(store.fetch_all(None).unwrap().len(), 2);
    }

    #[test]
    fn totals_sum_the_range() {
        let store = SqliteWorkoutStore::open_memory().unwrap();
        assert_eq!(store.totals(None).unwrap(), WorkoutTotals::default());

        store.save(&record("a", at(5), None)).unwrap();
        store.save(&record("b", at(6), None)).unwrap();
        store
            .save(&record("c", at(5) - Duration::days(2), None))
            .unwrap();

        let totals = store
            .totals(Some(DateRange::between(at(0), at(23))))
            .unwrap();
        assert_eq!(totals.workouts, 2);
        assert_eq!(totals.duration_seconds, 3600);
        assert!((totals.distance_meters - 6000.0).abs() < 1e-9);
        assert!((totals.energy_kilocalories - 500.0).abs() < 1e-9);
        assert!((totals.load_kilogram_hours - 12.0).abs() < 1e-9);
    }

    #[test]
    fn open_at_persists_across_handles() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ruckwear.db");
        {
            let store = SqliteWorkoutStore::open_at(&path).unwrap();
            store.save(&record("kept", at(6), None)).unwrap();
        }
        let store = SqliteWorkoutStore::open_at(&path).unwrap();
        assert!(store.get("kept").unwrap().is_some());
    }
}
