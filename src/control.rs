//! Operator control plane.
//!
//! The read and command surface an HTTP or chat front end calls into. Reads go
//! straight to the twin snapshot and the store; the administrative wipe is
//! routed through the ingestion queue.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::alerts::{Notifier, NotifyOutcome, SkipReason, SmsGateway};
use crate::db::{DbError, Event, Reading, Store};
use crate::ingest::{IngestError, IngestHandle};
use crate::ledger::{ChainStatus, HashChainLedger, LedgerError};
use crate::transport::{ControlCommand, ControlPublisher, TransportError};
use crate::twin::{DigitalTwin, TwinSnapshot};

/// Default number of readings returned by [`ControlPlane::recent_readings`].
pub const DEFAULT_READINGS_LIMIT: usize = 100;

/// Default number of events returned by [`ControlPlane::recent_events`].
pub const DEFAULT_EVENTS_LIMIT: usize = 20;

/// Reason attached to operator-initiated restores.
pub const MANUAL_RESTORE_REASON: &str = "Manual Restore";

/// Control plane error types.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("admin secret rejected")]
    Forbidden,
    #[error("command publish timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("ingestion error: {0}")]
    Ingest(#[from] IngestError),
}

/// Read-only grid summary for conversational answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridContext {
    pub transformer_load: f64,
    pub household_load: f64,
    pub theft_detected: bool,
    pub theft_amount: f64,
    pub system_status: &'static str,
}

/// Result of a manual load shed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShedResult {
    pub command: ControlCommand,
    pub notification: NotifyOutcome,
}

pub struct ControlPlane<P, G> {
    twin: DigitalTwin,
    store: Arc<Store>,
    ledger: Arc<HashChainLedger>,
    publisher: Arc<P>,
    notifier: Arc<Notifier<G>>,
    ingest: IngestHandle,
    admin_secret: Option<String>,
    publish_timeout: Duration,
}

impl<P: ControlPublisher, G: SmsGateway> ControlPlane<P, G> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        twin: DigitalTwin,
        store: Arc<Store>,
        ledger: Arc<HashChainLedger>,
        publisher: Arc<P>,
        notifier: Arc<Notifier<G>>,
        ingest: IngestHandle,
        admin_secret: Option<String>,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            twin,
            store,
            ledger,
            publisher,
            notifier,
            ingest,
            admin_secret: admin_secret.filter(|s| !s.is_empty()),
            publish_timeout,
        }
    }

    pub async fn snapshot(&self) -> TwinSnapshot {
        self.twin.snapshot().await
    }

    /// Newest readings first.
    pub fn recent_readings(&self, limit: Option<usize>) -> Result<Vec<Reading>, ControlError> {
        Ok(self
            .store
            .recent_readings(limit.unwrap_or(DEFAULT_READINGS_LIMIT))?)
    }

    /// Newest ledger events first.
    pub fn recent_events(&self, limit: Option<usize>) -> Result<Vec<Event>, ControlError> {
        Ok(self
            .store
            .recent_events(limit.unwrap_or(DEFAULT_EVENTS_LIMIT))?)
    }

    pub fn verify_chain(&self) -> Result<ChainStatus, ControlError> {
        Ok(self.ledger.verify_chain()?)
    }

    async fn publish(&self, command: &ControlCommand) -> Result<(), ControlError> {
        tokio::time::timeout(self.publish_timeout, self.publisher.publish(command))
            .await
            .map_err(|_| ControlError::Timeout(self.publish_timeout))??;
        Ok(())
    }

    /// Cut power by operator request and page the on-call technician.
    ///
    /// A publish failure is returned; a notification failure is only reported.
    pub async fn shed_load(&self, reason: &str) -> Result<ShedResult, ControlError> {
        let command = ControlCommand::shed_load(reason);
        self.publish(&command).await?;
        tracing::warn!("Manual load shed: {}", reason);

        let notification = match tokio::time::timeout(
            self.publish_timeout,
            self.notifier.notify(&format!("Manual Power Cut: {}", reason)),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => NotifyOutcome {
                sent: false,
                reason: Some(SkipReason::Failed("notification timed out".to_string())),
                response: None,
            },
        };

        Ok(ShedResult {
            command,
            notification,
        })
    }

    pub async fn restore_power(&self) -> Result<ControlCommand, ControlError> {
        let command = ControlCommand::restore_power(MANUAL_RESTORE_REASON);
        self.publish(&command).await?;
        tracing::info!("Power restored by operator");
        Ok(command)
    }

    /// Wipe all history and live state. Requires the configured admin secret.
    pub async fn reset(&self, secret: &str) -> Result<(), ControlError> {
        match self.admin_secret.as_deref() {
            Some(expected) if expected == secret => {}
            _ => {
                tracing::warn!("Rejected reset request with invalid admin secret");
                return Err(ControlError::Forbidden);
            }
        }

        self.ingest.reset().await?;
        Ok(())
    }

    pub async fn chat_context(&self) -> GridContext {
        let snapshot = self.twin.snapshot().await;
        GridContext {
            transformer_load: snapshot.transformer_current,
            household_load: snapshot.total_load,
            theft_detected: snapshot.theft_detected,
            theft_amount: snapshot.missing_current,
            system_status: if snapshot.theft_detected {
                "CRITICAL"
            } else {
                "NOMINAL"
            },
        }
    }
}
