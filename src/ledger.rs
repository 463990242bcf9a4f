//! Tamper-evident event ledger.
//!
//! Every event embeds the hash of its predecessor, so editing any stored
//! field breaks that event's own hash and every link after it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::db::{format_db_time, DbError, Event, NewEvent, Store};

/// `previous_hash` of the first event in a chain.
pub const GENESIS_HASH: &str = "GENESIS_BLOCK";

/// Ledger error types.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(#[from] DbError),
    #[error("ledger writer lock poisoned")]
    Poisoned,
}

/// Kinds of grid event recorded on the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    CriticalAging,
    ThermalShock,
    PhysicalTampering,
    AudioFail,
    TheftDetected,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::CriticalAging => "CRITICAL_AGING",
            EventKind::ThermalShock => "THERMAL_SHOCK",
            EventKind::PhysicalTampering => "PHYSICAL_TAMPERING",
            EventKind::AudioFail => "AUDIO_FAIL",
            EventKind::TheftDetected => "THEFT_DETECTED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRITICAL_AGING" => Ok(EventKind::CriticalAging),
            "THERMAL_SHOCK" => Ok(EventKind::ThermalShock),
            "PHYSICAL_TAMPERING" => Ok(EventKind::PhysicalTampering),
            "AUDIO_FAIL" => Ok(EventKind::AudioFail),
            "THEFT_DETECTED" => Ok(EventKind::TheftDetected),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// SHA-256 over `sensor_id|event_type|value|timestamp|previous_hash`, hex encoded.
///
/// The free-text `message` is not part of the digest, so edits to it are not
/// detected by verification.
pub fn compute_event_hash(
    sensor_id: &str,
    event_type: &str,
    value: f64,
    timestamp: &DateTime<Utc>,
    previous_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}|{}|{}|{}|{}",
            sensor_id,
            event_type,
            value,
            format_db_time(timestamp),
            previous_hash
        )
        .as_bytes(),
    );
    format!("{:x}", hasher.finalize())
}

/// A single integrity problem found during verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainViolation {
    /// `previous_hash` does not match the prior event's `event_hash`.
    BrokenLink {
        id: i64,
        expected: String,
        found: String,
    },
    /// Stored fields no longer hash to the stored `event_hash`.
    ContentMismatch { id: i64 },
}

impl ChainViolation {
    pub fn event_id(&self) -> i64 {
        match self {
            ChainViolation::BrokenLink { id, .. } | ChainViolation::ContentMismatch { id } => *id,
        }
    }
}

impl fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainViolation::BrokenLink {
                id,
                expected,
                found,
            } => write!(
                f,
                "Broken link at ID {}: expected {}, got {}",
                id,
                short_hash(expected),
                short_hash(found)
            ),
            ChainViolation::ContentMismatch { id } => {
                write!(f, "Data tampering at ID {}: content does not match hash", id)
            }
        }
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

/// Outcome of a full-chain audit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum ChainStatus {
    Secure { chain_length: usize },
    Corrupted { violations: Vec<ChainViolation> },
    Empty,
}

impl ChainStatus {
    pub fn is_secure(&self) -> bool {
        matches!(self, ChainStatus::Secure { .. })
    }
}

/// Audit an ordered event sequence.
///
/// Every event is checked for both link and content integrity; the walk never
/// stops early.
pub fn verify_events(events: &[Event]) -> ChainStatus {
    if events.is_empty() {
        return ChainStatus::Empty;
    }

    let mut violations = Vec::new();
    let mut expected_previous = GENESIS_HASH;

    for event in events {
        if event.previous_hash != expected_previous {
            violations.push(ChainViolation::BrokenLink {
                id: event.id,
                expected: expected_previous.to_string(),
                found: event.previous_hash.clone(),
            });
        }

        let recomputed = compute_event_hash(
            &event.sensor_id,
            &event.event_type,
            event.value,
            &event.timestamp,
            &event.previous_hash,
        );
        if recomputed != event.event_hash {
            violations.push(ChainViolation::ContentMismatch { id: event.id });
        }

        expected_previous = &event.event_hash;
    }

    if violations.is_empty() {
        ChainStatus::Secure {
            chain_length: events.len(),
        }
    } else {
        ChainStatus::Corrupted { violations }
    }
}

/// Append-only hash chain persisted in the [`Store`].
pub struct HashChainLedger {
    store: Arc<Store>,
    writer: Mutex<()>,
}

impl HashChainLedger {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
        }
    }

    /// Link, hash and persist a new event.
    ///
    /// Appends are serialized so two writers can never share a predecessor.
    pub fn append(
        &self,
        sensor_id: &str,
        kind: EventKind,
        value: f64,
        message: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Event, LedgerError> {
        let _guard = self.writer.lock().map_err(|_| LedgerError::Poisoned)?;

        let previous_hash = self
            .store
            .last_event_hash()?
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let event_hash =
            compute_event_hash(sensor_id, kind.as_str(), value, &timestamp, &previous_hash);

        let draft = NewEvent {
            sensor_id: sensor_id.to_string(),
            event_type: kind.as_str().to_string(),
            value,
            message: message.to_string(),
            timestamp,
            previous_hash,
            event_hash,
        };
        let id = self.store.insert_event(&draft)?;

        Ok(draft.into_event(id))
    }

    /// Re-hash the whole stored chain in id order.
    pub fn verify_chain(&self) -> Result<ChainStatus, LedgerError> {
        let events = self.store.events_ascending()?;
        Ok(verify_events(&events))
    }

    /// Clear every persisted event and reading.
    ///
    /// Holds the writer lock so no append can straddle the wipe.
    pub fn wipe(&self) -> Result<(), LedgerError> {
        let _guard = self.writer.lock().map_err(|_| LedgerError::Poisoned)?;
        self.store.wipe()?;
        Ok(())
    }
}
