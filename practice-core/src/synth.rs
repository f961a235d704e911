//! # Tone Synthesizer
//!
//! Renders metronome clicks, reference tones, chords and scale runs on the
//! shared audio context. Every sound is scheduled at an absolute context time,
//! never "as soon as possible", so callers decide exactly when it sounds.
//!
//! | Sound | Waveform | Envelope | Peak gain |
//! |---|---|---|---|
//! | click | sine | percussive, 100 ms | caller's volume |
//! | reference tone | sine | 100 ms linear attack, exponential release | 0.3 |
//! | chord voice | triangle | 100 ms linear attack, exponential release | 0.1 |
//!
//! When the context has no graph (uninitialized, unsupported or closed) every
//! play call is a logged no-op; argument validation still applies.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::config::SynthConfig;
use crate::context::AudioContextManager;
use crate::error::{Error, Result, require_positive};
use crate::graph::{Envelope, ToneRequest, Voice, Waveform};

/// Voicing used for chord names missing from the table.
pub const DEFAULT_CHORD: &str = "C";

/// A fixed set of frequencies played together for a chord name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChordVoicing {
    pub name: &'static str,
    pub frequencies: &'static [f32],
}

static CHORD_VOICINGS: Lazy<BTreeMap<&'static str, ChordVoicing>> = Lazy::new(|| {
    const TABLE: &[(&str, &[f32])] = &[
        ("C", &[261.63, 329.63, 392.00]),
        ("Cm", &[261.63, 311.13, 392.00]),
        ("D", &[146.83, 185.00, 220.00]),
        ("Dm", &[146.83, 174.61, 220.00]),
        ("E", &[164.81, 207.65, 246.94]),
        ("Em", &[164.81, 196.00, 246.94]),
        ("F", &[174.61, 220.00, 261.63, 349.23]),
        ("G", &[196.00, 246.94, 293.66]),
        ("A", &[220.00, 277.18, 329.63]),
        ("Am", &[220.00, 261.63, 329.63]),
        ("Bm", &[246.94, 293.66, 369.99]),
    ];
    TABLE
        .iter()
        .map(|&(name, frequencies)| (name, ChordVoicing { name, frequencies }))
        .collect()
});

pub fn chord_voicing(name: &str) -> Option<&'static ChordVoicing> {
    CHORD_VOICINGS.get(name)
}

/// Looks a chord up, substituting the default voicing for unknown names.
pub fn voicing_or_default(name: &str) -> &'static ChordVoicing {
    chord_voicing(name).unwrap_or_else(|| {
        log::debug!("Unknown chord {name:?}, using {DEFAULT_CHORD}");
        &CHORD_VOICINGS[DEFAULT_CHORD]
    })
}

pub fn chord_names() -> impl Iterator<Item = &'static str> {
    CHORD_VOICINGS.keys().copied()
}

/// One chord of a scheduled progression.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledChord {
    /// Name as requested by the caller.
    pub requested: String,
    /// Voicing actually played.
    pub voicing: &'static ChordVoicing,
    /// Seconds from the start of the progression.
    pub offset: f64,
    /// Absolute context time.
    pub start_time: f64,
}

#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    context: Arc<AudioContextManager>,
    config: SynthConfig,
}

impl ToneSynthesizer {
    pub fn new(context: Arc<AudioContextManager>, config: SynthConfig) -> Self {
        Self { context, config }
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<AudioContextManager> {
        &self.context
    }

    /// Current context time in seconds.
    pub fn now(&self) -> f64 {
        self.context.current_time()
    }

    fn schedule(&self, voices: impl IntoIterator<Item = Voice>) {
        let Some(destination) = self.context.destination() else {
            log::warn!("No audio context available; dropping sound");
            return;
        };
        for voice in voices {
            if !destination.schedule(voice) {
                log::warn!("Audio graph is gone; dropping sound");
                return;
            }
        }
    }

    /// Schedules a metronome click at context time `at`. Accented clicks use
    /// the accent frequency so the downbeat stands out.
    pub fn play_click(&self, accent: bool, volume: f32, at: f64) -> Result<ToneRequest> {
        if volume.is_nan() {
            return Err(Error::invalid("volume", "must be a number"));
        }
        let frequency = if accent {
            self.config.accent_frequency
        } else {
            self.config.regular_frequency
        };
        let tone = ToneRequest::new(
            frequency,
            self.config.click_duration,
            Waveform::Sine,
            volume.clamp(0.0, 1.0),
        )?;
        log::trace!("Click at {at:.4}s ({frequency} Hz)");
        self.schedule([Voice::new(tone, Envelope::Percussive, at)]);
        Ok(tone)
    }

    /// Plays a reference tone starting now.
    pub fn play_tone(&self, frequency_hz: f32, duration_seconds: f64) -> Result<ToneRequest> {
        self.play_tone_at(frequency_hz, duration_seconds, self.now())
    }

    pub fn play_tone_at(&self, frequency_hz: f32, duration_seconds: f64, start_time: f64) -> Result<ToneRequest> {
        let tone = ToneRequest::new(
            frequency_hz,
            duration_seconds,
            Waveform::Sine,
            self.config.reference_gain,
        )?;
        self.schedule([Voice::new(tone, self.swell(), start_time)]);
        Ok(tone)
    }

    /// Plays every note of a chord voicing at once. Unknown names play the
    /// default voicing.
    pub fn play_chord(&self, chord_name: &str, start_time: f64, duration_seconds: f64) -> Result<&'static ChordVoicing> {
        require_positive("duration", duration_seconds)?;
        let voicing = voicing_or_default(chord_name);
        let voices = voicing
            .frequencies
            .iter()
            .map(|&frequency| {
                ToneRequest::new(frequency, duration_seconds, Waveform::Triangle, self.config.chord_gain)
                    .map(|tone| Voice::new(tone, self.swell(), start_time))
            })
            .collect::<Result<Vec<_>>>()?;
        self.schedule(voices);
        Ok(voicing)
    }

    /// Schedules a progression starting now, one chord per measure: chord `i`
    /// starts at `i * beats_per_chord * 60 / bpm` seconds and lasts one measure.
    pub fn play_progression<S: AsRef<str>>(&self, chord_names: &[S], bpm: f64) -> Result<Vec<ScheduledChord>> {
        require_positive("bpm", bpm)?;
        let chord_duration = 60.0 / bpm * self.config.beats_per_chord as f64;
        let start = self.now();

        let mut scheduled = Vec::with_capacity(chord_names.len());
        for (index, name) in chord_names.iter().enumerate() {
            let offset = index as f64 * chord_duration;
            let voicing = self.play_chord(name.as_ref(), start + offset, chord_duration)?;
            scheduled.push(ScheduledChord {
                requested: name.as_ref().to_string(),
                voicing,
                offset,
                start_time: start + offset,
            });
        }
        log::info!(
            "Scheduled {} chords at {bpm} BPM ({:.2}s each)",
            scheduled.len(),
            chord_duration
        );
        Ok(scheduled)
    }

    /// Plays a run of notes starting now, one every `60 / notes_per_minute`
    /// seconds. Returns each note's start time.
    pub fn play_scale(&self, frequencies: &[f32], notes_per_minute: f64) -> Result<Vec<f64>> {
        require_positive("notes per minute", notes_per_minute)?;
        let spacing = 60.0 / notes_per_minute;
        let start = self.now();
        frequencies
            .iter()
            .enumerate()
            .map(|(index, &frequency)| {
                let at = start + index as f64 * spacing;
                self.play_tone_at(frequency, self.config.scale_note_duration, at)
                    .map(|_| at)
            })
            .collect()
    }

    fn swell(&self) -> Envelope {
        Envelope::Swell {
            attack: self.config.attack,
        }
    }
}
