//! Timing analysis of scheduled beats.
//!
//! Fits a straight line through (beat number, scheduled time): the slope is
//! the mean beat interval and the residuals are the jitter. A drift-free
//! scheduler has a slope of exactly `60 / bpm` and zero residuals.

use linreg::linear_regression;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingReport {
    /// Number of beats the fit is based on.
    pub beats: usize,
    /// Mean seconds between beats.
    pub mean_interval: f64,
    /// Largest distance of a beat from the fitted line, in seconds.
    pub max_jitter: f64,
}

impl TimingReport {
    /// Fits the given beat times, in scheduling order. Needs at least two
    /// beats at distinct times.
    pub fn from_beat_times(times: &[f64]) -> Option<Self> {
        if times.len() < 2 {
            return None;
        }
        let indices: Vec<f64> = (0..times.len()).map(|i| i as f64).collect();
        let (slope, intercept) = linear_regression::<_, _, f64>(&indices, times).ok()?;

        let max_jitter = indices
            .iter()
            .zip(times)
            .map(|(&i, &t)| (t - (intercept + slope * i)).abs())
            .fold(0.0, f64::max);

        Some(Self {
            beats: times.len(),
            mean_interval: slope,
            max_jitter,
        })
    }

    /// Tempo implied by the mean interval.
    pub fn tempo_bpm(&self) -> f64 {
        60.0 / self.mean_interval
    }

    /// Seconds per beat by which the mean interval differs from `bpm`'s
    /// nominal interval. Positive means the beats are late (too slow).
    pub fn drift_from(&self, bpm: f64) -> f64 {
        self.mean_interval - 60.0 / bpm
    }
}
