//! # Engine Configuration
//!
//! All tunable constants of the practice engine live here. Every section
//! carries `#[serde(default)]`, so a JSON file only needs the keys it wants
//! to change:
//!
//! ```json
//! { "metronome": { "bpm": 90, "time_signature": [3, 4] }, "tuner": { "reference_pitch": 432 } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The widest tempo range any configuration may allow.
pub const BPM_LIMITS: (f64, f64) = (40.0, 300.0);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub metronome: MetronomeConfig,
    pub tuner: TunerConfig,
    pub synth: SynthConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate requested from capture devices, in Hz.
    pub preferred_sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    pub bpm: f64,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Reject out-of-range tempos instead of clamping them.
    pub strict_bpm: bool,
    pub time_signature: [u32; 2],
    pub volume: f32,
    pub accent_enabled: bool,
    pub lookahead_ms: u64,
    pub poll_interval_ms: u64,
    /// Number of recent beat times kept for the timing report.
    pub history_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub fft_size: usize,
    /// Spectrum smoothing time constant in [0, 1).
    pub smoothing: f32,
    pub noise_floor_db: f32,
    pub min_frequency: f32,
    pub max_frequency: f32,
    pub reference_pitch: f32,
    pub in_tune_cents: i32,
    /// Analysis frames per second.
    pub analysis_rate_hz: u32,
    /// Parabolic interpolation around the peak bin.
    pub refine_peak: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub click_duration: f64,
    pub accent_frequency: f32,
    pub regular_frequency: f32,
    pub reference_duration: f64,
    pub reference_gain: f32,
    pub chord_gain: f32,
    pub attack: f64,
    pub beats_per_chord: u32,
    pub scale_note_duration: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            preferred_sample_rate: 44100,
        }
    }
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            min_bpm: 60.0,
            max_bpm: 200.0,
            strict_bpm: false,
            time_signature: [4, 4],
            volume: 0.7,
            accent_enabled: true,
            lookahead_ms: 100,
            poll_interval_ms: 25,
            history_len: 256,
        }
    }
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            fft_size: 4096,
            smoothing: 0.8,
            noise_floor_db: -50.0,
            min_frequency: 75.0,
            max_frequency: 400.0,
            reference_pitch: 440.0,
            in_tune_cents: 5,
            analysis_rate_hz: 60,
            refine_peak: false,
        }
    }
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            click_duration: 0.1,
            accent_frequency: 1200.0,
            regular_frequency: 800.0,
            reference_duration: 2.0,
            reference_gain: 0.3,
            chord_gain: 0.1,
            attack: 0.1,
            beats_per_chord: 4,
            scale_note_duration: 0.5,
        }
    }
}

impl MetronomeConfig {
    pub fn lookahead(&self) -> Duration {
        Duration::from_millis(self.lookahead_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&content)?;
        log::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Checks cross-field consistency. Individual setters validate their own
    /// arguments again at runtime.
    pub fn validate(&self) -> Result<()> {
        self.metronome.validate()?;
        self.tuner.validate()?;
        self.synth.validate()?;
        if self.audio.preferred_sample_rate == 0 {
            return Err(Error::invalid("audio.preferred_sample_rate", "must be non-zero"));
        }
        Ok(())
    }
}

impl MetronomeConfig {
    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = BPM_LIMITS;
        if !(self.min_bpm >= lo && self.max_bpm <= hi && self.min_bpm <= self.max_bpm) {
            return Err(Error::invalid(
                "metronome.min_bpm/max_bpm",
                format!("range must lie within [{lo}, {hi}], got [{}, {}]", self.min_bpm, self.max_bpm),
            ));
        }
        if !(self.bpm >= self.min_bpm && self.bpm <= self.max_bpm) {
            return Err(Error::invalid("metronome.bpm", format!("{} is outside the tempo range", self.bpm)));
        }
        crate::scheduler::TimeSignature::new(self.time_signature[0], self.time_signature[1])?;
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(Error::invalid("metronome.volume", "must lie in [0, 1]"));
        }
        if self.lookahead_ms == 0 || self.poll_interval_ms == 0 {
            return Err(Error::invalid("metronome.lookahead_ms", "lookahead and poll interval must be non-zero"));
        }
        if self.poll_interval_ms >= self.lookahead_ms {
            log::warn!(
                "Poll interval ({} ms) is not shorter than the lookahead ({} ms); clicks may arrive late",
                self.poll_interval_ms,
                self.lookahead_ms
            );
        }
        Ok(())
    }
}

impl TunerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two() || self.fft_size < 256 {
            return Err(Error::invalid("tuner.fft_size", "must be a power of two >= 256"));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(Error::invalid("tuner.smoothing", "must lie in [0, 1)"));
        }
        if !(self.min_frequency > 0.0 && self.min_frequency < self.max_frequency) {
            return Err(Error::invalid("tuner.min_frequency", "must be positive and below max_frequency"));
        }
        crate::tuning::validate_reference_pitch(self.reference_pitch)?;
        if self.analysis_rate_hz == 0 {
            return Err(Error::invalid("tuner.analysis_rate_hz", "must be non-zero"));
        }
        if self.in_tune_cents < 0 {
            return Err(Error::invalid("tuner.in_tune_cents", "must not be negative"));
        }
        Ok(())
    }
}

impl SynthConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("synth.click_duration", self.click_duration),
            ("synth.reference_duration", self.reference_duration),
            ("synth.attack", self.attack),
            ("synth.scale_note_duration", self.scale_note_duration),
            ("synth.accent_frequency", self.accent_frequency as f64),
            ("synth.regular_frequency", self.regular_frequency as f64),
        ] {
            crate::error::require_positive(name, value)?;
        }
        if self.beats_per_chord == 0 {
            return Err(Error::invalid("synth.beats_per_chord", "must be non-zero"));
        }
        Ok(())
    }
}
