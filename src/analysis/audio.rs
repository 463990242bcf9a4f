//! Acoustic distortion scoring.
//!
//! A healthy transformer hums at a single mains frequency. Arcing and loose
//! laminations spread energy across the spectrum, which this scorer measures.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;

use super::round_to;

/// Minimum number of samples needed for a meaningful spectrum.
pub const MIN_WAVEFORM_SAMPLES: usize = 10;

/// Number of waveform lengths whose plans are kept.
pub const PLAN_CACHE_CAPACITY: usize = 8;

/// Spectral distortion scorer.
///
/// Keeps forward plans for the most recently seen waveform lengths, oldest
/// evicted first. Plans are cached here rather than in an `FftPlanner`, which
/// is not `Send`.
#[derive(Default)]
pub struct AudioAnalyzer {
    plans: VecDeque<(usize, Arc<dyn Fft<f64>>)>,
}

impl std::fmt::Debug for AudioAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioAnalyzer")
            .field("cached_plans", &self.plans.len())
            .finish()
    }
}

impl AudioAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    fn plan(&mut self, len: usize) -> Arc<dyn Fft<f64>> {
        if let Some((_, fft)) = self.plans.iter().find(|(n, _)| *n == len) {
            return fft.clone();
        }

        let fft = FftPlanner::new().plan_fft_forward(len);
        if self.plans.len() == PLAN_CACHE_CAPACITY {
            self.plans.pop_front();
        }
        self.plans.push_back((len, fft.clone()));
        fft
    }

    /// Distortion score in `[0, 10)`, rounded to 2 decimals.
    ///
    /// The score is `10 * (1 - peak / total)` over the magnitude spectrum's
    /// lower half. Waveforms shorter than [`MIN_WAVEFORM_SAMPLES`] and silent
    /// waveforms score 0.0.
    pub fn analyze_distortion(&mut self, waveform: &[f64]) -> f64 {
        if waveform.len() < MIN_WAVEFORM_SAMPLES {
            return 0.0;
        }

        let n = waveform.len();
        let mut buffer: Vec<Complex<f64>> =
            waveform.iter().map(|&x| Complex::new(x, 0.0)).collect();

        self.plan(n).process(&mut buffer);

        let magnitudes: Vec<f64> = buffer[..n / 2].iter().map(|c| c.norm()).collect();

        let total: f64 = magnitudes.iter().sum();
        if total == 0.0 {
            return 0.0;
        }

        let peak = magnitudes.iter().copied().fold(0.0_f64, f64::max);
        let noise_ratio = 1.0 - peak / total;

        round_to(noise_ratio * 10.0, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn sine(samples: usize, cycles: f64) -> Vec<f64> {
        (0..samples)
            .map(|i| (2.0 * PI * cycles * i as f64 / samples as f64).sin())
            .collect()
    }

    #[test]
    fn test_short_or_empty_waveform_scores_zero() {
        let mut analyzer = AudioAnalyzer::new();
        assert_eq!(analyzer.analyze_distortion(&[]), 0.0);
        assert_eq!(analyzer.analyze_distortion(&[0.5; 9]), 0.0);
    }

    #[test]
    fn test_plans_are_reused_per_length() {
        let mut analyzer = AudioAnalyzer::new();
        analyzer.analyze_distortion(&sine(64, 4.0));
        analyzer.analyze_distortion(&sine(64, 8.0));
        analyzer.analyze_distortion(&sine(128, 4.0));
        assert_eq!(analyzer.plans.len(), 2);
    }

    #[test]
    fn test_plan_cache_is_bounded() {
        let mut analyzer = AudioAnalyzer::new();
        for len in MIN_WAVEFORM_SAMPLES..MIN_WAVEFORM_SAMPLES + 500 {
            analyzer.analyze_distortion(&vec![0.5; len]);
        }
        assert_eq!(analyzer.plans.len(), PLAN_CACHE_CAPACITY);

        // Only the most recent lengths survive.
        let newest = MIN_WAVEFORM_SAMPLES + 499;
        assert_eq!(analyzer.plans.back().map(|(n, _)| *n), Some(newest));
        assert!(analyzer.plans.iter().all(|(n, _)| *n > newest - PLAN_CACHE_CAPACITY));
    }

    #[test]
    fn test_silence_scores_zero() {
        let mut analyzer = AudioAnalyzer::new();
        assert_eq!(analyzer.analyze_distortion(&[0.0; 64]), 0.0);
    }

    #[test]
    fn test_pure_hum_scores_near_zero() {
        let mut analyzer = AudioAnalyzer::new();
        let score = analyzer.analyze_distortion(&sine(200, 10.0));
        assert!(score < 0.1, "pure sine scored {score}");
    }

    #[test]
    fn test_noise_scores_much_higher_than_hum() {
        let mut analyzer = AudioAnalyzer::new();
        let mut rng = StdRng::seed_from_u64(7);
        let noise: Vec<f64> = (0..200).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let hum = analyzer.analyze_distortion(&sine(200, 10.0));
        let hiss = analyzer.analyze_distortion(&noise);

        assert!(hiss > 5.0, "white noise scored {hiss}");
        assert!(hiss > hum + 5.0);
    }

    #[test]
    fn test_hum_with_harmonics_scores_in_between() {
        let mut analyzer = AudioAnalyzer::new();
        let fundamental = sine(200, 10.0);
        let harmonic = sine(200, 30.0);
        let mixed: Vec<f64> = fundamental
            .iter()
            .zip(&harmonic)
            .map(|(a, b)| a + 0.5 * b)
            .collect();

        let score = analyzer.analyze_distortion(&mixed);
        // Peak is 2/3 of the spectral mass.
        assert!((score - 3.33).abs() < 0.05, "harmonic mix scored {score}");
    }
}
