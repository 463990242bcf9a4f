//! Outbound operator notifications.
//!
//! A single global cooldown gates every alert type so a flapping sensor cannot
//! page the on-call technician more than once per window.

mod sms;

pub use sms::*;

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Default minimum interval between successful notifications.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Notification error types.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("provider rejected message: {0}")]
    Rejected(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A paging channel that can deliver a text message.
pub trait SmsGateway: Send + Sync + 'static {
    /// Deliver `message` to `destination`, returning the provider's response.
    fn send(
        &self,
        destination: &str,
        message: &str,
    ) -> impl Future<Output = Result<String, NotifyError>> + Send;
}

/// Why a notification was not sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    MissingConfig,
    Cooldown,
    Failed(String),
}

impl SkipReason {
    pub fn as_str(&self) -> &str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::MissingConfig => "missing_config",
            SkipReason::Cooldown => "cooldown",
            SkipReason::Failed(msg) => msg,
        }
    }
}

/// Result of a notification attempt. Never an error for the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotifyOutcome {
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl NotifyOutcome {
    fn sent(response: String) -> Self {
        Self {
            sent: true,
            reason: None,
            response: Some(response),
        }
    }

    fn skipped(reason: SkipReason) -> Self {
        Self {
            sent: false,
            reason: Some(reason),
            response: None,
        }
    }
}

/// Notifier settings.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub destination: Option<String>,
    pub cooldown: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destination: None,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Rate-limited front for an [`SmsGateway`].
///
/// `gateway` is `None` when credentials were not supplied.
pub struct Notifier<G> {
    gateway: Option<G>,
    config: NotifierConfig,
    last_sent: Mutex<Option<Instant>>,
}

impl<G: SmsGateway> Notifier<G> {
    pub fn new(gateway: Option<G>, config: NotifierConfig) -> Self {
        Self {
            gateway,
            config,
            last_sent: Mutex::new(None),
        }
    }

    /// Try to page the operator with `message`.
    ///
    /// The cooldown check, the send and the timestamp update run under one
    /// lock, so concurrent callers cannot both pass the gate.
    pub async fn notify(&self, message: &str) -> NotifyOutcome {
        if !self.config.enabled {
            return NotifyOutcome::skipped(SkipReason::Disabled);
        }

        let (Some(gateway), Some(destination)) =
            (self.gateway.as_ref(), self.config.destination.as_deref())
        else {
            return NotifyOutcome::skipped(SkipReason::MissingConfig);
        };

        let mut last_sent = self.last_sent.lock().await;
        let now = Instant::now();

        if let Some(previous) = *last_sent {
            if now.duration_since(previous) < self.config.cooldown {
                tracing::debug!("Notification suppressed by cooldown: {}", message);
                return NotifyOutcome::skipped(SkipReason::Cooldown);
            }
        }

        let text = format!("GRID-SENTINEL\n{}", message);
        match gateway.send(destination, &text).await {
            Ok(response) => {
                *last_sent = Some(now);
                tracing::info!("Notification sent to {}", mask_destination(destination));
                NotifyOutcome::sent(response)
            }
            Err(e) => {
                tracing::error!("Notification failed: {}", e);
                NotifyOutcome::skipped(SkipReason::Failed(e.to_string()))
            }
        }
    }
}

/// Keep only the last four characters of a phone number for logs.
fn mask_destination(destination: &str) -> String {
    let visible = destination.len().saturating_sub(4);
    match destination.get(visible..) {
        Some(tail) => format!("***{}", tail),
        None => "***".to_string(),
    }
}
