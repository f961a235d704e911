//! # Fast Fourier Transform (FFT) Module
//!
//! Frequency-domain analysis for the tuner. Provides the building blocks
//! (DC removal, Hann window, forward FFT, magnitude extraction) and the
//! [`SpectrumAnalyser`], which turns a live sample stream into a smoothed
//! magnitude spectrum in decibels, one analysis frame at a time.
//!
//! ## Features
//! - High-performance FFT using RustFFT, planned once per analyser
//! - Hann windowing for reduced spectral leakage
//! - DC offset removal for accurate analysis
//! - Exponential smoothing of magnitudes across frames

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// Removes the DC offset from a signal by making its average value zero.
///
/// DC offset would otherwise show up as a large component at 0 Hz and win
/// the peak search.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window to the input buffer to reduce spectral leakage.
fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Performs a forward FFT on a signal and returns the complex spectrum.
///
/// The signal is DC-corrected and Hann-windowed first. Any length works;
/// powers of two are fastest.
pub fn perform_fft(signal: &[f32]) -> Vec<Complex<f32>> {
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(signal.len());
    transform(fft.as_ref(), signal)
}

fn transform(fft: &dyn Fft<f32>, signal: &[f32]) -> Vec<Complex<f32>> {
    let mut processed_signal = signal.to_vec();
    remove_dc_offset(&mut processed_signal);
    apply_hann_window(&mut processed_signal);

    let mut buffer: Vec<Complex<f32>> = processed_signal
        .into_iter()
        .map(|sample| Complex { re: sample, im: 0.0 })
        .collect();

    fft.process(&mut buffer);
    buffer
}

/// Calculates the magnitude vector from a complex spectrum.
///
/// Only the first half of the spectrum (up to the Nyquist frequency) is
/// returned.
pub fn spectrum_to_magnitudes(spectrum: &[Complex<f32>]) -> Vec<f32> {
    spectrum
        .iter()
        .take(spectrum.len() / 2)
        .map(|c| c.norm()) // .norm() is sqrt(re^2 + im^2)
        .collect()
}

/// Converts a linear magnitude to decibels. Zero maps to negative infinity.
pub fn to_decibels(magnitude: f32) -> f32 {
    20.0 * magnitude.log10()
}

/// Centre frequency of an FFT bin.
pub fn bin_to_frequency(bin: f32, sample_rate: u32, fft_size: usize) -> f32 {
    bin * sample_rate as f32 / fft_size as f32
}

/// Rolling spectrum analysis over the most recent `fft_size` samples.
///
/// Magnitudes are normalized by 1/N and smoothed between frames with
/// `m = τ·m_prev + (1 − τ)·|X|`, where τ is the smoothing time constant.
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    smoothing: f32,
    window: VecDeque<f32>,
    smoothed: Vec<f32>,
}

impl SpectrumAnalyser {
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        Self {
            fft,
            fft_size,
            smoothing: smoothing.clamp(0.0, 0.999),
            window: VecDeque::from(vec![0.0; fft_size]),
            smoothed: vec![0.0; fft_size / 2],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of bins in the reported spectrum.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Appends new samples, discarding the oldest beyond `fft_size`.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let skip = samples.len().saturating_sub(self.fft_size);
        for &sample in &samples[skip..] {
            self.window.pop_front();
            self.window.push_back(sample);
        }
    }

    /// Runs one analysis frame over the current window and returns the
    /// smoothed spectrum in dB.
    pub fn analyse(&mut self) -> Vec<f32> {
        let signal: Vec<f32> = self.window.iter().copied().collect();
        let spectrum = transform(self.fft.as_ref(), &signal);
        let scale = 1.0 / self.fft_size as f32;
        let tau = self.smoothing;

        for (smoothed, current) in self.smoothed.iter_mut().zip(spectrum_to_magnitudes(&spectrum)) {
            *smoothed = tau * *smoothed + (1.0 - tau) * current * scale;
        }
        self.smoothed.iter().map(|&m| to_decibels(m)).collect()
    }

    /// Forgets all history, as after reconnecting the input.
    pub fn reset(&mut self) {
        self.window.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|m| *m = 0.0);
    }
}
