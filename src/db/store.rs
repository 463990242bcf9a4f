//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("database lock poisoned")]
    Poisoned,
}

const READING_COLUMNS: &str = "id, sensor_id, temperature, current, vibration, aging_factor, \
     rate_of_rise, distortion, timestamp, predicted_failure_minutes";

const EVENT_COLUMNS: &str =
    "id, sensor_id, event_type, value, message, timestamp, previous_hash, event_hash";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Create a store backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database schema.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Readings ---

    /// Insert a reading and return its ID.
    pub fn insert_reading(&self, reading: &NewReading) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO readings (sensor_id, temperature, current, vibration, aging_factor, rate_of_rise, distortion, timestamp, predicted_failure_minutes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                reading.sensor_id,
                reading.temperature,
                reading.current,
                reading.vibration,
                reading.aging_factor,
                reading.rate_of_rise,
                reading.distortion,
                format_db_time(&reading.timestamp),
                reading.predicted_failure_minutes,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get the most recent readings, newest first.
    pub fn recent_readings(&self, limit: usize) -> Result<Vec<Reading>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {READING_COLUMNS} FROM readings ORDER BY timestamp DESC, id DESC LIMIT ?1"
        ))?;

        let readings = stmt
            .query_map(params![limit as i64], reading_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(readings)
    }

    // --- Events ---

    /// Insert a hashed event and return its ID.
    pub fn insert_event(&self, event: &NewEvent) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO events (sensor_id, event_type, value, message, timestamp, previous_hash, event_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.sensor_id,
                event.event_type,
                event.value,
                event.message,
                format_db_time(&event.timestamp),
                event.previous_hash,
                event.event_hash,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get the most recent events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<Event>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY timestamp DESC, id DESC LIMIT ?1"
        ))?;

        let events = stmt
            .query_map(params![limit as i64], event_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(events)
    }

    /// Get every event in chain order.
    pub fn events_ascending(&self) -> Result<Vec<Event>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY id ASC"))?;

        let events = stmt
            .query_map([], event_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(events)
    }

    /// Hash of the most recently appended event, if any.
    pub fn last_event_hash(&self) -> Result<Option<String>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT event_hash FROM events ORDER BY id DESC LIMIT 1")?;
        let mut rows = stmt.query([])?;

        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Number of stored events.
    pub fn event_count(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?)
    }

    /// Number of stored readings.
    pub fn reading_count(&self) -> Result<i64, DbError> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM readings", [], |r| r.get(0))?)
    }

    // --- Administration ---

    /// Delete every reading and event in one transaction.
    ///
    /// Row ids restart from 1 afterwards.
    pub fn wipe(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM readings", [])?;
        tx.execute("DELETE FROM events", [])?;
        tx.execute(
            "DELETE FROM sqlite_sequence WHERE name IN ('readings', 'events')",
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Run raw SQL against the database, bypassing the append-only API.
    #[cfg(test)]
    pub(crate) fn execute_unchecked(&self, sql: &str) -> Result<usize, DbError> {
        let conn = self.conn()?;
        Ok(conn.execute(sql, [])?)
    }
}

fn reading_from_row(row: &Row<'_>) -> SqlResult<Reading> {
    let time_str: String = row.get(8)?;
    Ok(Reading {
        id: row.get(0)?,
        sensor_id: row.get(1)?,
        temperature: row.get(2)?,
        current: row.get(3)?,
        vibration: row.get(4)?,
        aging_factor: row.get(5)?,
        rate_of_rise: row.get(6)?,
        distortion: row.get(7)?,
        timestamp: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        predicted_failure_minutes: row.get(9)?,
    })
}

fn event_from_row(row: &Row<'_>) -> SqlResult<Event> {
    let time_str: String = row.get(5)?;
    Ok(Event {
        id: row.get(0)?,
        sensor_id: row.get(1)?,
        event_type: row.get(2)?,
        value: row.get(3)?,
        message: row.get(4)?,
        // An unparsable timestamp can only come from an out-of-band edit; the
        // substituted value will fail hash verification and be reported.
        timestamp: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        previous_hash: row.get(6)?,
        event_hash: row.get(7)?,
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        DB_TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
