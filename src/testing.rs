//! In-memory capability doubles shared by unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::alerts::{NotifyError, SmsGateway};
use crate::transport::{ControlCommand, ControlPublisher, InboundMessage, MessageSink, TransportError};

/// Gateway that records every message it is asked to send.
#[derive(Clone, Default)]
pub struct RecordingGateway {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingGateway {
    pub fn failing() -> Self {
        let gateway = Self::default();
        gateway.set_failing(true);
        gateway
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

impl SmsGateway for RecordingGateway {
    async fn send(&self, destination: &str, message: &str) -> Result<String, NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected("gateway offline".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((destination.to_string(), message.to_string()));
        Ok("queued".to_string())
    }
}

/// Publisher that records commands instead of reaching a broker.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    commands: Arc<Mutex<Vec<ControlCommand>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.failing.store(true, Ordering::SeqCst);
        publisher
    }

    pub fn commands(&self) -> Vec<ControlCommand> {
        self.commands.lock().unwrap().clone()
    }
}

impl ControlPublisher for RecordingPublisher {
    async fn publish(&self, command: &ControlCommand) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Client("broker unreachable".to_string()));
        }
        self.commands.lock().unwrap().push(command.clone());
        Ok(())
    }
}

/// Sink that keeps every delivered message.
#[derive(Clone, Default)]
pub struct RecordingSink {
    messages: Arc<Mutex<Vec<InboundMessage>>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<InboundMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl MessageSink for RecordingSink {
    async fn deliver(&self, message: InboundMessage) -> bool {
        self.messages.lock().unwrap().push(message);
        true
    }
}
