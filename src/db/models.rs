//! Database model types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Timestamp layout used for every persisted time column.
///
/// The ledger hashes this exact text, so it must round-trip losslessly.
pub const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Format a timestamp the way it is stored (and hashed).
pub fn format_db_time(time: &DateTime<Utc>) -> String {
    time.format(DB_TIME_FORMAT).to_string()
}

/// A persisted transformer telemetry snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Reading {
    pub id: i64,
    pub sensor_id: String,
    pub temperature: f64,
    pub current: f64,
    pub vibration: f64,
    pub aging_factor: f64,
    pub rate_of_rise: f64,
    pub distortion: f64,
    pub timestamp: DateTime<Utc>,
    pub predicted_failure_minutes: Option<f64>,
}

/// A reading that has not been stored yet.
#[derive(Debug, Clone)]
pub struct NewReading {
    pub sensor_id: String,
    pub temperature: f64,
    pub current: f64,
    pub vibration: f64,
    pub aging_factor: f64,
    pub rate_of_rise: f64,
    pub distortion: f64,
    pub timestamp: DateTime<Utc>,
    pub predicted_failure_minutes: Option<f64>,
}

/// A ledger entry as stored.
///
/// `event_type` is kept as text so that rows edited outside the service still
/// load and can be reported by chain verification.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: i64,
    pub sensor_id: String,
    pub event_type: String,
    pub value: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub event_hash: String,
}

/// A fully hashed ledger entry waiting for its row id.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub sensor_id: String,
    pub event_type: String,
    pub value: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub previous_hash: String,
    pub event_hash: String,
}

impl NewEvent {
    /// Attach the row id assigned by the store.
    pub fn into_event(self, id: i64) -> Event {
        Event {
            id,
            sensor_id: self.sensor_id,
            event_type: self.event_type,
            value: self.value,
            message: self.message,
            timestamp: self.timestamp,
            previous_hash: self.previous_hash,
            event_hash: self.event_hash,
        }
    }
}
