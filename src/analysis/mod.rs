//! Signal analysis for transformer telemetry.
//!
//! Thermal aging and rate-of-rise, acoustic distortion, and time-to-failure
//! extrapolation.

mod audio;
mod physics;
mod prediction;

pub use audio::*;
pub use physics::*;
pub use prediction::*;

/// Round to a fixed number of decimal places.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
