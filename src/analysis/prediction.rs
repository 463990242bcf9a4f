//! Time-to-threshold extrapolation over a sliding temperature window.

use std::collections::VecDeque;

use super::round_to;

/// Number of samples retained in the regression window.
pub const WINDOW_CAPACITY: usize = 60;

/// Samples required before any prediction is made.
pub const MIN_SAMPLES: usize = 10;

/// Predictions further out than this are discarded as unreliable.
pub const MAX_HORIZON_SECS: f64 = 3600.0;

/// Default failure temperature for [`FailurePredictor::predict_minutes_to_threshold`].
pub const DEFAULT_LIMIT_TEMP_C: f64 = 100.0;

/// One `(time, temperature)` observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSample {
    pub time_secs: f64,
    pub temperature: f64,
}

/// Ordinary least-squares trend over the most recent temperature samples.
#[derive(Debug, Clone, Default)]
pub struct FailurePredictor {
    window: VecDeque<TemperatureSample>,
}

impl FailurePredictor {
    pub fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_CAPACITY),
        }
    }

    /// Append a sample, evicting the oldest once the window is full.
    pub fn add_sample(&mut self, temperature: f64, time_secs: f64) {
        if self.window.len() == WINDOW_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(TemperatureSample {
            time_secs,
            temperature,
        });
    }

    /// Minutes until the fitted trend reaches `limit_temp`, rounded to 1 decimal.
    ///
    /// Returns `None` when there are fewer than [`MIN_SAMPLES`] samples, when
    /// the trend is flat or cooling, or when the crossing lies in the past or
    /// more than an hour ahead.
    pub fn predict_minutes_to_threshold(&self, limit_temp: f64) -> Option<f64> {
        if self.window.len() < MIN_SAMPLES {
            return None;
        }

        let latest = self.window.back()?.time_secs;
        let (slope, mean_time, mean_temp) = self.fit()?;
        if slope <= 0.0 {
            return None;
        }

        // Fit is centred on the mean time to keep epoch-scale inputs stable.
        let temp_at_latest = mean_temp + slope * (latest - mean_time);
        let seconds_left = (limit_temp - temp_at_latest) / slope;

        if !(0.0..=MAX_HORIZON_SECS).contains(&seconds_left) {
            return None;
        }

        Some(round_to(seconds_left / 60.0, 1))
    }

    /// Returns `(slope, mean_time, mean_temperature)`, or `None` if every
    /// sample shares one timestamp.
    fn fit(&self) -> Option<(f64, f64, f64)> {
        let n = self.window.len() as f64;
        let mean_time = self.window.iter().map(|s| s.time_secs).sum::<f64>() / n;
        let mean_temp = self.window.iter().map(|s| s.temperature).sum::<f64>() / n;

        let (covariance, variance) = self.window.iter().fold((0.0, 0.0), |(cov, var), s| {
            let dt = s.time_secs - mean_time;
            (cov + dt * (s.temperature - mean_temp), var + dt * dt)
        });

        if variance == 0.0 {
            return None;
        }

        Some((covariance / variance, mean_time, mean_temp))
    }
}
