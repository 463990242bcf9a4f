//! Publish/subscribe transport.
//!
//! Inbound telemetry arrives on one topic; relay commands leave on another.
//! The ingestion pipeline only sees the narrow [`ControlPublisher`] capability.

mod mqtt;

pub use mqtt::*;

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Transport error types.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
    #[error("client error: {0}")]
    Client(String),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Relay state requested by a control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayCommand {
    Off,
    On,
}

/// Command urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Critical,
    Normal,
}

/// JSON payload published on the control topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub command: RelayCommand,
    pub priority: Priority,
    pub reason: String,
}

impl ControlCommand {
    /// Cut power downstream of the transformer.
    pub fn shed_load(reason: &str) -> Self {
        Self {
            command: RelayCommand::Off,
            priority: Priority::Critical,
            reason: reason.to_string(),
        }
    }

    /// Re-energise the relay.
    pub fn restore_power(reason: &str) -> Self {
        Self {
            command: RelayCommand::On,
            priority: Priority::Normal,
            reason: reason.to_string(),
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, TransportError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Something that can deliver a [`ControlCommand`] to field relays.
pub trait ControlPublisher: Send + Sync + 'static {
    fn publish(
        &self,
        command: &ControlCommand,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
