//! Inbound sensor message schema and validation.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Message validation error types.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sensor_id is empty")]
    EmptySensorId,
    #[error("unknown device type: {0}")]
    UnknownDeviceClass(String),
    #[error("{device} message is missing `{field}`")]
    MissingField {
        device: DeviceClass,
        field: &'static str,
    },
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Kind of device that produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceClass {
    Transformer,
    Meter,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Transformer => "TRANSFORMER",
            DeviceClass::Meter => "METER",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceClass {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRANSFORMER" => Ok(DeviceClass::Transformer),
            "METER" => Ok(DeviceClass::Meter),
            _ => Err(MessageError::UnknownDeviceClass(s.to_string())),
        }
    }
}

/// Wire form, everything optional so validation can name what is missing.
#[derive(Debug, Deserialize)]
struct RawSensorMessage {
    sensor_id: String,
    #[serde(default)]
    device_type: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    current: Option<f64>,
    #[serde(default)]
    vibration: Option<f64>,
    #[serde(default)]
    audio_waveform: Option<Vec<f64>>,
    #[serde(default)]
    timestamp: Option<RawTimestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    EpochSeconds(f64),
    Text(String),
}

impl RawTimestamp {
    fn resolve(self) -> Result<DateTime<Utc>, MessageError> {
        match self {
            RawTimestamp::EpochSeconds(secs) => {
                DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
                    .ok_or_else(|| MessageError::InvalidTimestamp(secs.to_string()))
            }
            RawTimestamp::Text(text) => parse_timestamp(&text)
                .ok_or(MessageError::InvalidTimestamp(text)),
        }
    }
}

/// RFC 3339, or a naive ISO-8601 datetime taken as UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}

/// A validated telemetry message.
///
/// For meters only `current` carries meaning; the other readings are zeroed.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorMessage {
    pub sensor_id: String,
    pub device_class: DeviceClass,
    pub temperature: f64,
    pub current: f64,
    pub vibration: f64,
    pub waveform: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}

impl SensorMessage {
    /// Decode and validate a JSON payload.
    ///
    /// `received_at` stands in for a missing timestamp.
    pub fn parse(payload: &[u8], received_at: DateTime<Utc>) -> Result<Self, MessageError> {
        let raw: RawSensorMessage = serde_json::from_slice(payload)?;

        let sensor_id = raw.sensor_id.trim().to_string();
        if sensor_id.is_empty() {
            return Err(MessageError::EmptySensorId);
        }

        let device_class = match raw.device_type.as_deref() {
            Some(text) => text.parse()?,
            None => DeviceClass::Transformer,
        };

        let require = |value: Option<f64>, field: &'static str| {
            value.ok_or(MessageError::MissingField {
                device: device_class,
                field,
            })
        };

        let current = require(raw.current, "current")?;
        let (temperature, vibration, waveform) = match device_class {
            DeviceClass::Transformer => (
                require(raw.temperature, "temperature")?,
                require(raw.vibration, "vibration")?,
                raw.audio_waveform.unwrap_or_default(),
            ),
            DeviceClass::Meter => (0.0, 0.0, Vec::new()),
        };

        let timestamp = match raw.timestamp {
            Some(ts) => ts.resolve()?,
            None => received_at,
        };

        Ok(Self {
            sensor_id,
            device_class,
            temperature,
            current,
            vibration,
            waveform,
            timestamp,
        })
    }

    /// Timestamp as fractional epoch seconds.
    pub fn epoch_seconds(&self) -> f64 {
        self.timestamp.timestamp_micros() as f64 / 1_000_000.0
    }
}
