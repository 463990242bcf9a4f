//! Telemetry ingestion.
//!
//! The transport hands raw payloads to an [`IngestHandle`], which feeds a
//! bounded queue drained by exactly one worker task. Messages are processed
//! one at a time, in arrival order, so ledger appends and twin updates never
//! interleave.

mod message;
mod pipeline;
mod policy;

pub use message::*;
pub use pipeline::*;
pub use policy::*;

use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::alerts::SmsGateway;
use crate::ledger::LedgerError;
use crate::transport::{ControlPublisher, InboundMessage, MessageSink};

/// Default ingestion queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// How long a producer waits for queue space before dropping a message.
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Ingestion error types.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("ingestion queue is closed")]
    Closed,
    #[error("ingestion queue still full after {0:?}")]
    Full(Duration),
    #[error("reset failed: {0}")]
    Reset(#[from] LedgerError),
}

/// Work items for the ingestion worker.
#[derive(Debug)]
pub enum IngestCommand {
    Message(InboundMessage),
    /// Administrative wipe, serialized with message processing.
    Reset {
        reply: oneshot::Sender<Result<(), LedgerError>>,
    },
}

/// Producer side of the ingestion queue.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestCommand>,
    enqueue_timeout: Duration,
}

impl IngestHandle {
    /// Queue a raw message, waiting at most the enqueue timeout for space.
    pub async fn submit(&self, message: InboundMessage) -> Result<(), IngestError> {
        self.tx
            .send_timeout(IngestCommand::Message(message), self.enqueue_timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => {
                    IngestError::Full(self.enqueue_timeout)
                }
                mpsc::error::SendTimeoutError::Closed(_) => IngestError::Closed,
            })
    }

    /// Wipe all state once every message queued before this call is processed.
    pub async fn reset(&self) -> Result<(), IngestError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(IngestCommand::Reset { reply })
            .await
            .map_err(|_| IngestError::Closed)?;

        response.await.map_err(|_| IngestError::Closed)??;
        Ok(())
    }
}

impl MessageSink for IngestHandle {
    async fn deliver(&self, message: InboundMessage) -> bool {
        match self.submit(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to enqueue message: {}", e);
                false
            }
        }
    }
}

impl<P: ControlPublisher, G: SmsGateway> Pipeline<P, G> {
    /// Move the pipeline onto its worker task.
    ///
    /// The worker exits once every [`IngestHandle`] is dropped and the queue
    /// is drained.
    pub fn spawn(self, capacity: usize, enqueue_timeout: Duration) -> (IngestHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(self, rx));

        (
            IngestHandle {
                tx,
                enqueue_timeout,
            },
            worker,
        )
    }
}

async fn run_worker<P: ControlPublisher, G: SmsGateway>(
    mut pipeline: Pipeline<P, G>,
    mut rx: mpsc::Receiver<IngestCommand>,
) {
    tracing::info!("Ingestion worker started");
    let mut processed: u64 = 0;
    let mut dropped: u64 = 0;

    while let Some(command) = rx.recv().await {
        match command {
            IngestCommand::Message(message) => {
                match pipeline
                    .handle_payload(&message.payload, message.received_at)
                    .await
                {
                    Some(_) => processed += 1,
                    None => dropped += 1,
                }
            }
            IngestCommand::Reset { reply } => {
                let result = pipeline.reset().await;
                if let Err(e) = &result {
                    tracing::error!("Reset failed: {}", e);
                }
                // The requester may have given up waiting.
                let _ = reply.send(result);
            }
        }
    }

    tracing::info!(
        "Ingestion worker drained: {} processed, {} dropped",
        processed,
        dropped
    );
}
