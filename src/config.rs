//! Configuration module for Grid Sentinel.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unparseable values are ignored in favour of the default.

use std::env;
use std::time::Duration;

use crate::alerts::{NotifierConfig, DEFAULT_COOLDOWN};
use crate::ingest::{
    PipelineConfig, PolicyConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_SIDE_EFFECT_TIMEOUT,
    DEFAULT_SHOCK_MIN_TEMP_C,
};
use crate::transport::MqttSettings;
use crate::twin::DEFAULT_THEFT_THRESHOLD_AMPS;

pub const DEFAULT_SMS_ENDPOINT: &str = "https://api.smsmobileapi.com/sendsms/";

const MQTT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the SQLite database file (default: "grid_sentinel.db")
    pub db_path: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    /// Topic telemetry is received on
    pub mqtt_topic: String,
    /// Topic relay commands are published on
    pub control_topic: String,
    pub mqtt_client_id: String,
    /// Multiply accelerated aging by 100 for demonstrations
    pub demo_mode: bool,
    pub theft_threshold_amps: f64,
    /// Minimum temperature for a thermal shock; `None` disables the floor
    pub shock_min_temp_c: Option<f64>,
    pub alert_cooldown: Duration,
    pub sms_enabled: bool,
    pub sms_api_key: Option<String>,
    pub sms_destination: Option<String>,
    pub sms_endpoint: String,
    /// Secret required for the administrative wipe; unset refuses it
    pub admin_secret: Option<String>,
    pub queue_capacity: usize,
    /// Upper bound on each publish or SMS send
    pub side_effect_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: "grid_sentinel.db".to_string(),
            mqtt_host: "broker.hivemq.com".to_string(),
            mqtt_port: 1883,
            mqtt_topic: "grid/sentinel/data".to_string(),
            control_topic: "grid/sentinel/control".to_string(),
            mqtt_client_id: format!("grid-sentinel-{:04x}", rand::random::<u16>()),
            demo_mode: false,
            theft_threshold_amps: DEFAULT_THEFT_THRESHOLD_AMPS,
            shock_min_temp_c: Some(DEFAULT_SHOCK_MIN_TEMP_C),
            alert_cooldown: DEFAULT_COOLDOWN,
            sms_enabled: true,
            sms_api_key: None,
            sms_destination: None,
            sms_endpoint: DEFAULT_SMS_ENDPOINT.to_string(),
            admin_secret: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            side_effect_timeout: DEFAULT_SIDE_EFFECT_TIMEOUT,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn mask(secret: &Option<String>) -> &'static str {
    if secret.is_some() {
        "<set>"
    } else {
        "<unset>"
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SENTINEL_DB_PATH`: Database file path (default: "grid_sentinel.db")
    /// - `SENTINEL_MQTT_HOST`, `SENTINEL_MQTT_PORT`: Broker (default: broker.hivemq.com:1883)
    /// - `SENTINEL_MQTT_TOPIC`, `SENTINEL_CONTROL_TOPIC`: Telemetry and command topics
    /// - `SENTINEL_MQTT_CLIENT_ID`: Client id (default: random)
    /// - `SENTINEL_DEMO_MODE`: Aging amplification (default: false)
    /// - `SENTINEL_THEFT_THRESHOLD_AMPS`: Theft threshold (default: 2.0)
    /// - `SENTINEL_SHOCK_MIN_TEMP_C`: Thermal shock floor, `off` to disable (default: 29.0)
    /// - `SENTINEL_ALERT_COOLDOWN_SECS`: Notification cooldown (default: 300)
    /// - `SENTINEL_SMS_ENABLED`, `SENTINEL_SMS_API_KEY`, `SENTINEL_SMS_DESTINATION`,
    ///   `SENTINEL_SMS_ENDPOINT`: SMS gateway
    /// - `SENTINEL_ADMIN_SECRET`: Reset secret (default: unset)
    /// - `SENTINEL_QUEUE_CAPACITY`: Ingestion queue size (default: 1024)
    /// - `SENTINEL_SIDE_EFFECT_TIMEOUT_MS`: Publish/SMS timeout (default: 5000)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(db_path) = lookup("SENTINEL_DB_PATH").and_then(non_empty) {
            cfg.db_path = db_path;
        }

        if let Some(host) = lookup("SENTINEL_MQTT_HOST").and_then(non_empty) {
            cfg.mqtt_host = host;
        }

        if let Some(port) = lookup("SENTINEL_MQTT_PORT").and_then(|v| v.trim().parse().ok()) {
            cfg.mqtt_port = port;
        }

        if let Some(topic) = lookup("SENTINEL_MQTT_TOPIC").and_then(non_empty) {
            cfg.mqtt_topic = topic;
        }

        if let Some(topic) = lookup("SENTINEL_CONTROL_TOPIC").and_then(non_empty) {
            cfg.control_topic = topic;
        }

        if let Some(client_id) = lookup("SENTINEL_MQTT_CLIENT_ID").and_then(non_empty) {
            cfg.mqtt_client_id = client_id;
        }

        if let Some(demo) = lookup("SENTINEL_DEMO_MODE").and_then(|v| parse_bool(&v)) {
            cfg.demo_mode = demo;
        }

        if let Some(threshold) = lookup("SENTINEL_THEFT_THRESHOLD_AMPS")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|t| t.is_finite() && *t >= 0.0)
        {
            cfg.theft_threshold_amps = threshold;
        }

        if let Some(floor) = lookup("SENTINEL_SHOCK_MIN_TEMP_C") {
            match floor.trim().to_ascii_lowercase().as_str() {
                "off" | "none" => cfg.shock_min_temp_c = None,
                other => {
                    if let Some(temp) = other.parse::<f64>().ok().filter(|t| t.is_finite()) {
                        cfg.shock_min_temp_c = Some(temp);
                    }
                }
            }
        }

        if let Some(secs) = lookup("SENTINEL_ALERT_COOLDOWN_SECS").and_then(|v| v.trim().parse().ok()) {
            cfg.alert_cooldown = Duration::from_secs(secs);
        }

        if let Some(enabled) = lookup("SENTINEL_SMS_ENABLED").and_then(|v| parse_bool(&v)) {
            cfg.sms_enabled = enabled;
        }

        cfg.sms_api_key = lookup("SENTINEL_SMS_API_KEY").and_then(non_empty);
        cfg.sms_destination = lookup("SENTINEL_SMS_DESTINATION").and_then(non_empty);

        if let Some(endpoint) = lookup("SENTINEL_SMS_ENDPOINT").and_then(non_empty) {
            cfg.sms_endpoint = endpoint;
        }

        cfg.admin_secret = lookup("SENTINEL_ADMIN_SECRET").and_then(non_empty);

        if let Some(capacity) = lookup("SENTINEL_QUEUE_CAPACITY")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|c| *c > 0)
        {
            cfg.queue_capacity = capacity;
        }

        if let Some(ms) = lookup("SENTINEL_SIDE_EFFECT_TIMEOUT_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            cfg.side_effect_timeout = Duration::from_millis(ms);
        }

        cfg
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_summary(&self) {
        tracing::info!("Using database at {}", self.db_path);
        tracing::info!(
            "MQTT broker {}:{} (telemetry: {}, control: {}, client: {})",
            self.mqtt_host,
            self.mqtt_port,
            self.mqtt_topic,
            self.control_topic,
            self.mqtt_client_id
        );
        tracing::info!(
            "Theft threshold {:.2}A, shock floor {}, demo mode {}",
            self.theft_threshold_amps,
            self.shock_min_temp_c
                .map(|t| format!("{:.1}C", t))
                .unwrap_or_else(|| "off".to_string()),
            self.demo_mode
        );
        tracing::info!(
            "SMS alerts {} (api key {}, destination {}, cooldown {:?})",
            if self.sms_enabled { "enabled" } else { "disabled" },
            mask(&self.sms_api_key),
            mask(&self.sms_destination),
            self.alert_cooldown
        );
        tracing::info!("Admin reset secret {}", mask(&self.admin_secret));
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        MqttSettings {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            telemetry_topic: self.mqtt_topic.clone(),
            control_topic: self.control_topic.clone(),
            keep_alive: MQTT_KEEP_ALIVE,
            publish_timeout: self.side_effect_timeout,
        }
    }

    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            enabled: self.sms_enabled,
            destination: self.sms_destination.clone(),
            cooldown: self.alert_cooldown,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            policy: PolicyConfig {
                shock_min_temp: self.shock_min_temp_c,
                ..PolicyConfig::default()
            },
            demo_amplification: self.demo_mode,
            side_effect_timeout: self.side_effect_timeout,
            ..PipelineConfig::default()
        }
    }
}
