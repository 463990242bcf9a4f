//! Transformer thermal model.
//!
//! Insulation aging follows the IEEE C57.91 Arrhenius relation referenced to a
//! 110 °C hot spot (383 K). Ambient-to-hot-spot rise is a fixed 15 K.

use chrono::{DateTime, Utc};

use super::round_to;

/// Arrhenius gradient constant for thermally upgraded paper.
pub const AGING_GRADIENT: f64 = 15000.0;

/// Reference hot-spot temperature in Kelvin (110 °C).
const REFERENCE_HOTSPOT_K: f64 = 383.0;

/// Hot-spot rise over the measured temperature.
const HOTSPOT_RISE_K: f64 = 15.0;

/// Multiplier applied to accelerated aging when demo amplification is on.
pub const DEMO_AGING_AMPLIFICATION: f64 = 100.0;

/// Per-stream thermal model.
///
/// Aging is a pure function of temperature; rate-of-rise keeps the previous
/// sample, so one engine must only ever see a single sensor's readings.
#[derive(Debug, Clone, Default)]
pub struct PhysicsEngine {
    amplify: bool,
    last_sample: Option<(f64, DateTime<Utc>)>,
}

impl PhysicsEngine {
    pub fn new(amplify: bool) -> Self {
        Self {
            amplify,
            last_sample: None,
        }
    }

    /// Aging acceleration factor at `temp_c`, rounded to 2 decimals.
    ///
    /// 1.0 means nominal aging at the reference hot spot.
    pub fn compute_aging_factor(&self, temp_c: f64) -> f64 {
        let hotspot_k = temp_c + 273.0 + HOTSPOT_RISE_K;
        let aging = (AGING_GRADIENT / REFERENCE_HOTSPOT_K - AGING_GRADIENT / hotspot_k).exp();

        if self.amplify && aging > 1.0 {
            return round_to(aging * DEMO_AGING_AMPLIFICATION, 2);
        }

        round_to(aging, 2)
    }

    /// Temperature rate-of-rise in °C per minute, rounded to 3 decimals.
    ///
    /// The first call only seeds state and returns 0.0, as does a call that
    /// shares its timestamp with the previous one. The stored sample is
    /// replaced on every call.
    pub fn detect_thermal_shock(&mut self, temp_c: f64, timestamp: DateTime<Utc>) -> f64 {
        let previous = self.last_sample.replace((temp_c, timestamp));

        let Some((last_temp, last_time)) = previous else {
            return 0.0;
        };

        let elapsed = timestamp - last_time;
        if elapsed.is_zero() {
            return 0.0;
        }

        let minutes = match elapsed.num_nanoseconds() {
            Some(ns) => ns as f64 / 60_000_000_000.0,
            None => elapsed.num_milliseconds() as f64 / 60_000.0,
        };
        round_to((temp_c - last_temp) / minutes, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_aging_is_unity_at_reference_hotspot() {
        let engine = PhysicsEngine::new(false);
        // 95 °C measured + 15 K rise = 110 °C hot spot
        assert_eq!(engine.compute_aging_factor(95.0), 1.0);
    }

    #[test]
    fn test_aging_grows_with_temperature() {
        let engine = PhysicsEngine::new(false);
        let cool = engine.compute_aging_factor(40.0);
        let hot = engine.compute_aging_factor(110.0);
        assert!(cool < 0.01);
        assert!(hot > 4.0, "aging at 110C was {hot}");
    }

    #[test]
    fn test_demo_amplification_only_above_unity() {
        let plain = PhysicsEngine::new(false);
        let demo = PhysicsEngine::new(true);

        assert_eq!(demo.compute_aging_factor(40.0), plain.compute_aging_factor(40.0));

        let raw = (AGING_GRADIENT / 383.0 - AGING_GRADIENT / (105.0 + 288.0)).exp();
        assert_eq!(demo.compute_aging_factor(105.0), round_to(raw * 100.0, 2));
    }

    #[test]
    fn test_first_shock_sample_returns_zero() {
        let mut engine = PhysicsEngine::new(false);
        assert_eq!(engine.detect_thermal_shock(80.0, t0()), 0.0);
    }

    #[test]
    fn test_rate_of_rise_per_minute() {
        let mut engine = PhysicsEngine::new(false);
        engine.detect_thermal_shock(40.0, t0());
        let rate = engine.detect_thermal_shock(41.5, t0() + Duration::seconds(1));
        assert_eq!(rate, 90.0);

        let cooling = engine.detect_thermal_shock(41.0, t0() + Duration::seconds(31));
        assert_eq!(cooling, -1.0);
    }

    #[test]
    fn test_same_timestamp_is_zero_and_updates_state() {
        let mut engine = PhysicsEngine::new(false);
        engine.detect_thermal_shock(40.0, t0());
        assert_eq!(engine.detect_thermal_shock(45.0, t0()), 0.0);

        // The 45.0 sample replaced the 40.0 one.
        let rate = engine.detect_thermal_shock(46.0, t0() + Duration::seconds(60));
        assert_eq!(rate, 1.0);
    }

    #[test]
    fn test_sub_millisecond_gaps_keep_full_precision() {
        let mut engine = PhysicsEngine::new(false);
        engine.detect_thermal_shock(40.0, t0());
        let rate = engine.detect_thermal_shock(40.001, t0() + Duration::microseconds(1500));
        assert_eq!(rate, 40.0);

        let mut engine = PhysicsEngine::new(false);
        engine.detect_thermal_shock(40.0, t0());
        let rate = engine.detect_thermal_shock(41.0, t0() + Duration::microseconds(500));
        assert_eq!(rate, 120000.0);
    }

    #[test]
    fn test_large_gap_uses_millisecond_fallback() {
        let mut engine = PhysicsEngine::new(false);
        let start = Utc.with_ymd_and_hms(1700, 1, 1, 0, 0, 0).unwrap();
        engine.detect_thermal_shock(40.0, start);
        // Over ~292 years the nanosecond count overflows.
        let rate = engine.detect_thermal_shock(40.0, t0());
        assert_eq!(rate, 0.0);
    }
}
