//! Detection thresholds for transformer telemetry.

use crate::ledger::EventKind;

/// Aging acceleration above which insulation wear is critical.
pub const AGING_LIMIT: f64 = 4.0;

/// Rate-of-rise limit in °C per minute.
pub const SHOCK_RATE_LIMIT: f64 = 2.0;

/// Temperature below which a fast rise is not treated as a shock.
pub const DEFAULT_SHOCK_MIN_TEMP_C: f64 = 29.0;

/// Vibration level that indicates physical interference.
pub const VIBRATION_LIMIT: f64 = 0.6;

/// Distortion score limit.
pub const DISTORTION_LIMIT: f64 = 3.0;

/// Policy limits. Every comparison is strictly greater-than.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    pub aging_limit: f64,
    pub shock_rate_limit: f64,
    /// `None` evaluates rate-of-rise at any temperature.
    pub shock_min_temp: Option<f64>,
    pub vibration_limit: f64,
    pub distortion_limit: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            aging_limit: AGING_LIMIT,
            shock_rate_limit: SHOCK_RATE_LIMIT,
            shock_min_temp: Some(DEFAULT_SHOCK_MIN_TEMP_C),
            vibration_limit: VIBRATION_LIMIT,
            distortion_limit: DISTORTION_LIMIT,
        }
    }
}

/// Metrics derived from one transformer message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformerMetrics {
    pub temperature: f64,
    pub vibration: f64,
    pub aging_factor: f64,
    pub rate_of_rise: f64,
    pub distortion: f64,
}

/// Load shed and page raised when a safety-critical breach starts.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyAction {
    /// Reason published with the OFF command.
    pub shed_reason: &'static str,
    pub alert: String,
}

/// A threshold breached by one message.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub kind: EventKind,
    pub value: f64,
    pub message: String,
    pub action: Option<SafetyAction>,
}

impl Breach {
    /// Whether this breach cuts power and pages the operator.
    pub fn is_safety_critical(&self) -> bool {
        self.action.is_some()
    }
}

impl PolicyConfig {
    fn shock_armed(&self, temperature: f64) -> bool {
        self.shock_min_temp.map_or(true, |floor| temperature > floor)
    }

    /// Evaluate the four independent transformer policies, in ledger order.
    pub fn evaluate(&self, metrics: &TransformerMetrics) -> Vec<Breach> {
        let mut breaches = Vec::new();

        if metrics.aging_factor > self.aging_limit {
            breaches.push(Breach {
                kind: EventKind::CriticalAging,
                value: metrics.aging_factor,
                message: format!(
                    "Insulation aging {:.2}x nominal at {:.1}C",
                    metrics.aging_factor, metrics.temperature
                ),
                action: None,
            });
        }

        if metrics.rate_of_rise > self.shock_rate_limit && self.shock_armed(metrics.temperature) {
            breaches.push(Breach {
                kind: EventKind::ThermalShock,
                value: metrics.rate_of_rise,
                message: format!(
                    "Rapid heating {:.3}C/min, now {:.1}C",
                    metrics.rate_of_rise, metrics.temperature
                ),
                action: Some(SafetyAction {
                    shed_reason: "Thermal Shock Detected",
                    alert: format!(
                        "Thermal Shock! Temp rose rapidly to {}C. Power Cut Triggered.",
                        metrics.temperature
                    ),
                }),
            });
        }

        if metrics.vibration > self.vibration_limit {
            breaches.push(Breach {
                kind: EventKind::PhysicalTampering,
                value: metrics.vibration,
                message: format!("Vibration level {} (hammering/sawing)", metrics.vibration),
                action: Some(SafetyAction {
                    shed_reason: "Physical Tampering Detected",
                    alert: format!(
                        "Physical Tampering Detected! Vibration Level: {}",
                        metrics.vibration
                    ),
                }),
            });
        }

        if metrics.distortion > self.distortion_limit {
            breaches.push(Breach {
                kind: EventKind::AudioFail,
                value: metrics.distortion,
                message: format!("Acoustic distortion score {:.2}", metrics.distortion),
                action: None,
            });
        }

        breaches
    }
}

/// Tracks whether a policy is currently breached.
///
/// Actions fire on the rising edge only; the latch re-arms once the metric is
/// back within limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreachLatch {
    active: bool,
}

impl BreachLatch {
    /// Record the latest evaluation and report whether it is a new breach.
    pub fn update(&mut self, breached: bool) -> bool {
        let rising = breached && !self.active;
        self.active = breached;
        rising
    }

    pub fn reset(&mut self) {
        self.active = false;
    }
}
