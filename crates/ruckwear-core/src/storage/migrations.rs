//! Database schema migrations for the workout store.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const SCHEMA_VERSION: i32 = 2;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    }) {
        Ok(v) => Ok(v),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: the workouts table.
///
/// `started_at` is epoch seconds so range queries and ordering are numeric.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS workouts (
            id              TEXT PRIMARY KEY,
            started_at      INTEGER NOT NULL,
            duration_secs   INTEGER NOT NULL CHECK (duration_secs >= 0),
            distance_m      REAL NOT NULL CHECK (distance_m >= 0),
            energy_kcal     REAL NOT NULL CHECK (energy_kcal >= 0),
            load_kg         REAL NOT NULL CHECK (load_kg >= 0),
            avg_heart_rate  REAL
        );

        CREATE INDEX IF NOT EXISTS idx_workouts_started_at ON workouts(started_at);",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: program/challenge association.
///
/// One kind column keeps "at most one tag per record" a schema property.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "ALTER TABLE workouts ADD COLUMN tag_kind TEXT;
         ALTER TABLE workouts ADD COLUMN tag_collection TEXT;
         ALTER TABLE workouts ADD COLUMN tag_day INTEGER;

         CREATE INDEX IF NOT EXISTS idx_workouts_tag ON workouts(tag_kind, tag_collection);",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn v1_database_is_upgraded_in_place() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema_version_table(&conn).unwrap();
        migrate_v1(&conn).unwrap();
        conn.execute(
            "INSERT INTO workouts (id, started_at, duration_secs, distance_m, energy_kcal, load_kg)
             VALUES ('old', 100, 60, 10.0, 5.0, 0.0)",
            [],
        )
        .unwrap();

        migrate(&conn).unwrap();

        let tag: Option<String> = conn
            .query_row("SELECT tag_kind FROM workouts WHERE id = 'old'", [], |row| row.get(0))
            .unwrap();
        assert!(tag.is_none());
        assert_eq!(get_schema_version(&conn).unwrap(), 2);
    }
}
