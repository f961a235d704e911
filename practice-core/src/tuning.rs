//! # Musical Tuning Module
//!
//! Equal-temperament arithmetic for the guitar tuner: naming the nearest note
//! of a frequency, measuring the deviation in cents and classifying it.
//!
//! Note boundaries are always derived from the current reference pitch (the
//! frequency assigned to A4) with log2 arithmetic, never from a fixed table,
//! so that changing the reference rescales every note.
//!
//! ## Features
//! - Nearest-note lookup relative to any A4 reference
//! - Cent deviation calculations for tuning accuracy
//! - Note name parsing (`A4`, `C#3`, `Bb2`)
//! - The six open-string reference pitches of standard guitar tuning

use std::ops::RangeInclusive;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::PitchEstimate;
use crate::error::{Error, Result};

/// Note names in ascending order from C, using sharps.
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Accepted values for the A4 reference pitch, in Hz.
pub const REFERENCE_PITCH_RANGE: RangeInclusive<f32> = 400.0..=480.0;

pub const DEFAULT_REFERENCE_PITCH: f32 = 440.0;

/// Semitones from C0 up to A4.
const A4_SEMITONES_FROM_C0: f64 = 57.0;

/// Represents a single musical note with its name and frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    /// Note name (e.g., "A4", "C#3")
    pub name: String,
    /// Frequency in Hz
    pub frequency: f32,
}

/// How a measured pitch relates to its nearest note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Accuracy {
    Sharp,
    Flat,
    InTune,
}

/// Open strings of a guitar in standard tuning, low to high.
///
/// These are fixed reference frequencies for playback; they do not follow the
/// tuner's reference pitch.
static OPEN_STRINGS: Lazy<Vec<Note>> = Lazy::new(|| {
    [
        ("E2", 82.41),
        ("A2", 110.00),
        ("D3", 146.83),
        ("G3", 196.00),
        ("B3", 246.94),
        ("E4", 329.63),
    ]
    .into_iter()
    .map(|(name, frequency)| Note {
        name: name.to_string(),
        frequency,
    })
    .collect()
});

pub fn open_strings() -> &'static [Note] {
    &OPEN_STRINGS
}

pub fn open_string_frequency(name: &str) -> Option<f32> {
    OPEN_STRINGS
        .iter()
        .find(|note| note.name == name)
        .map(|note| note.frequency)
}

pub fn validate_reference_pitch(hz: f32) -> Result<f32> {
    if REFERENCE_PITCH_RANGE.contains(&hz) {
        Ok(hz)
    } else {
        Err(Error::invalid(
            "reference pitch",
            format!(
                "{hz} Hz is outside {}..={} Hz",
                REFERENCE_PITCH_RANGE.start(),
                REFERENCE_PITCH_RANGE.end()
            ),
        ))
    }
}

/// Frequency of C0 for a given A4 reference.
fn c0_frequency(reference: f32) -> f64 {
    reference as f64 * 2f64.powf(-A4_SEMITONES_FROM_C0 / 12.0)
}

fn name_for_semitone(semitones_from_c0: i32) -> String {
    let name = NOTE_NAMES[semitones_from_c0.rem_euclid(12) as usize];
    let octave = semitones_from_c0.div_euclid(12);
    format!("{name}{octave}")
}

/// Finds the equal-tempered note closest to `freq`.
///
/// # Returns
/// * `Some(note)` - Nearest note name and its exact frequency
/// * `None` - `freq` is not a positive, finite frequency
pub fn find_nearest_note(freq: f32, reference: f32) -> Option<Note> {
    if !(freq.is_finite() && freq > 0.0) {
        return None;
    }
    let c0 = c0_frequency(reference);
    let semitones = (12.0 * (freq as f64 / c0).log2()).round() as i32;
    Some(Note {
        name: name_for_semitone(semitones),
        frequency: (c0 * 2f64.powf(semitones as f64 / 12.0)) as f32,
    })
}

/// Calculates the deviation from a target frequency in cents.
///
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    (1200.0 * (freq as f64 / target_freq as f64).log2()) as f32
}

/// |cents| within the window is in tune; otherwise the sign decides.
pub fn classify(cents: i32, in_tune_cents: i32) -> Accuracy {
    if cents.abs() <= in_tune_cents {
        Accuracy::InTune
    } else if cents > 0 {
        Accuracy::Sharp
    } else {
        Accuracy::Flat
    }
}

/// Builds a full estimate for a measured frequency: nearest note, cents
/// rounded to an integer, accuracy from the rounded cents, and the frequency
/// rounded to 0.1 Hz for display.
pub fn estimate_for_frequency(freq: f32, reference: f32, in_tune_cents: i32) -> Option<PitchEstimate> {
    let nearest = find_nearest_note(freq, reference)?;
    let cents = calculate_cents_deviation(freq, nearest.frequency).round() as i32;
    Some(PitchEstimate {
        frequency_hz: (freq * 10.0).round() / 10.0,
        note_name: nearest.name,
        cents_deviation: cents,
        accuracy: classify(cents, in_tune_cents),
    })
}

/// Splits a note name into its semitone offset from C (`-1` for `Cb`, `12`
/// for `B#`) and whatever follows the accidental.
fn split_pitch_class(name: &str) -> Option<(i32, &str)> {
    let mut chars = name.chars();
    let base = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let rest = chars.as_str();
    Some(if let Some(rest) = rest.strip_prefix('#') {
        (base + 1, rest)
    } else if let Some(rest) = rest.strip_prefix('b') {
        (base - 1, rest)
    } else {
        (base, rest)
    })
}

/// Index into [`NOTE_NAMES`] of a pitch class such as `E`, `F#` or `Bb`.
pub fn pitch_class(name: &str) -> Result<usize> {
    match split_pitch_class(name) {
        Some((semitones, "")) => Ok(semitones.rem_euclid(12) as usize),
        _ => Err(Error::invalid("pitch class", format!("cannot parse {name:?}"))),
    }
}

/// Parses a note name such as `A4`, `C#3` or `Bb2` into its equal-tempered
/// frequency for the given reference.
pub fn note_frequency(name: &str, reference: f32) -> Result<f32> {
    let bad = || Error::invalid("note name", format!("cannot parse {name:?}"));

    let (semitones, octave) = split_pitch_class(name).ok_or_else(bad)?;
    let octave: i32 = octave.parse().map_err(|_| bad())?;

    let semitones = octave * 12 + semitones;
    Ok((c0_frequency(reference) * 2f64.powf(semitones as f64 / 12.0)) as f32)
}
