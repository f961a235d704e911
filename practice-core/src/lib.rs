// practice-core/src/lib.rs

//! The audio core of the guitar practice tool: a drift-free metronome, a
//! guitar tuner and tone/chord playback, all sharing one audio context.
//! This crate is headless and contains no GUI code.
//!
//! [`PracticeEngine`] wires everything together; the components can also be
//! used on their own around a shared [`AudioContextManager`].

pub mod audio;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fft;
pub mod graph;
pub mod input;
pub mod offline;
pub mod pitch;
pub mod scales;
pub mod scheduler;
pub mod synth;
pub mod timing;
pub mod tuning;

use serde::{Deserialize, Serialize};

pub use config::EngineConfig;
pub use context::{AudioBackend, AudioContextManager, ContextState};
pub use engine::PracticeEngine;
pub use error::{Error, Result};
pub use graph::{ToneRequest, Waveform};
pub use input::{InputDevice, SyntheticInput};
pub use offline::OfflineBackend;
pub use pitch::PitchDetector;
pub use scheduler::{BeatClock, BeatScheduler, TimeSignature};
pub use synth::{ChordVoicing, ToneSynthesizer};
pub use tuning::Accuracy;

/// The tuner's reading for one analysis frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// Measured frequency, rounded to 0.1 Hz.
    pub frequency_hz: f32,
    /// Nearest equal-tempered note, e.g. "A4".
    pub note_name: String,
    /// Deviation from that note, rounded to whole cents.
    pub cents_deviation: i32,
    pub accuracy: Accuracy,
}
