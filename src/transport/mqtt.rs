//! MQTT transport built on `rumqttc`.

use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::{ControlCommand, ControlPublisher, TransportError};

/// Pause between failed connection attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Capacity of the client request queue.
const REQUEST_CAPACITY: usize = 64;

/// A raw message received from the broker.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// Receiver of inbound transport messages.
pub trait MessageSink: Send + Sync + 'static {
    /// Hand a message over. Returns `false` if it was dropped.
    fn deliver(&self, message: InboundMessage) -> impl Future<Output = bool> + Send;
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub telemetry_topic: String,
    pub control_topic: String,
    pub keep_alive: Duration,
    pub publish_timeout: Duration,
}

fn mqtt_options(settings: &MqttSettings) -> MqttOptions {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(settings.keep_alive);
    options.set_clean_session(true);
    options
}

/// MQTT connection: telemetry subscriber plus control publisher.
pub struct MqttTransport {
    client: AsyncClient,
    eventloop: EventLoop,
    settings: MqttSettings,
}

impl MqttTransport {
    /// Build the client. No network I/O happens until [`MqttTransport::spawn`].
    pub fn new(settings: MqttSettings) -> Self {
        let (client, eventloop) = AsyncClient::new(mqtt_options(&settings), REQUEST_CAPACITY);
        Self {
            client,
            eventloop,
            settings,
        }
    }

    /// Publisher sharing this connection.
    pub fn publisher(&self) -> MqttControlPublisher {
        MqttControlPublisher {
            client: self.client.clone(),
            topic: self.settings.control_topic.clone(),
            timeout: self.settings.publish_timeout,
        }
    }

    /// Drive the connection until a stop signal arrives.
    ///
    /// The subscription is renewed on every (re)connect since sessions are
    /// clean.
    pub fn spawn<S: MessageSink>(self, sink: S, stop: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(run_event_loop(self, sink, stop))
    }
}

async fn run_event_loop<S: MessageSink>(
    transport: MqttTransport,
    sink: S,
    mut stop: broadcast::Receiver<()>,
) {
    let MqttTransport {
        client,
        mut eventloop,
        settings,
    } = transport;

    tracing::info!(
        "Connecting to MQTT broker {}:{} as {}",
        settings.host,
        settings.port,
        settings.client_id
    );

    loop {
        tokio::select! {
            _ = stop.recv() => {
                break;
            }
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("Connected to MQTT broker {}", settings.host);
                        if let Err(e) = client.try_subscribe(&settings.telemetry_topic, QoS::AtLeastOnce) {
                            tracing::error!("Failed to subscribe to {}: {}", settings.telemetry_topic, e);
                        } else {
                            tracing::info!("Listening on topic {}", settings.telemetry_topic);
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = InboundMessage {
                            topic: publish.topic,
                            payload: publish.payload.to_vec(),
                            received_at: Utc::now(),
                        };
                        if !sink.deliver(message).await {
                            tracing::warn!("Inbound message dropped by ingestion queue");
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("MQTT connection error: {}", e);
                        tokio::select! {
                            _ = stop.recv() => break,
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                }
            }
        }
    }

    if let Err(e) = client.try_disconnect() {
        tracing::debug!("MQTT disconnect request failed: {}", e);
    }
    tracing::info!("MQTT transport stopped");
}

/// Publishes control commands on the configured topic.
#[derive(Clone)]
pub struct MqttControlPublisher {
    client: AsyncClient,
    topic: String,
    timeout: Duration,
}

impl ControlPublisher for MqttControlPublisher {
    async fn publish(&self, command: &ControlCommand) -> Result<(), TransportError> {
        let payload = command.to_payload()?;

        tokio::time::timeout(
            self.timeout,
            self.client.publish(&self.topic, QoS::AtLeastOnce, false, payload),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.timeout))?
        .map_err(|e| TransportError::Client(e.to_string()))?;

        tracing::info!("Sent command {:?} to {}", command.command, self.topic);
        Ok(())
    }
}
