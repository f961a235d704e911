//! Scale table and scale note generation for scale playback.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::tuning::{NOTE_NAMES, note_frequency, pitch_class};

/// Octave the root of a generated scale sits in.
pub const SCALE_OCTAVE: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleType {
    /// Display name, e.g. "Harmonic Minor".
    pub name: &'static str,
    /// Semitones above the root, ascending, starting at 0.
    pub intervals: &'static [u8],
}

impl ScaleType {
    /// Whole/half step pattern, e.g. `W W H W W W H` for major. Steps larger
    /// than a whole tone are written as sums (`W+H`).
    pub fn step_pattern(&self) -> String {
        let steps = self
            .intervals
            .iter()
            .copied()
            .chain(std::iter::once(12))
            .collect::<Vec<u8>>();
        steps
            .windows(2)
            .map(|pair| match pair[1] - pair[0] {
                1 => "H".to_string(),
                2 => "W".to_string(),
                3 => "W+H".to_string(),
                n => format!("{n}"),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

static SCALE_TYPES: Lazy<BTreeMap<&'static str, ScaleType>> = Lazy::new(|| {
    const TABLE: &[(&str, &str, &[u8])] = &[
        ("major", "Major", &[0, 2, 4, 5, 7, 9, 11]),
        ("natural_minor", "Natural Minor", &[0, 2, 3, 5, 7, 8, 10]),
        ("harmonic_minor", "Harmonic Minor", &[0, 2, 3, 5, 7, 8, 11]),
        ("melodic_minor", "Melodic Minor", &[0, 2, 3, 5, 7, 9, 11]),
        ("dorian", "Dorian", &[0, 2, 3, 5, 7, 9, 10]),
        ("phrygian", "Phrygian", &[0, 1, 3, 5, 7, 8, 10]),
        ("lydian", "Lydian", &[0, 2, 4, 6, 7, 9, 11]),
        ("mixolydian", "Mixolydian", &[0, 2, 4, 5, 7, 9, 10]),
        ("locrian", "Locrian", &[0, 1, 3, 5, 6, 8, 10]),
        ("pentatonic_major", "Pentatonic Major", &[0, 2, 4, 7, 9]),
        ("pentatonic_minor", "Pentatonic Minor", &[0, 3, 5, 7, 10]),
        ("blues", "Blues", &[0, 3, 5, 6, 7, 10]),
    ];
    TABLE
        .iter()
        .map(|&(key, name, intervals)| (key, ScaleType { name, intervals }))
        .collect()
});

/// Looks a scale up by key (`major`, `pentatonic_minor`, ...).
pub fn scale_type(key: &str) -> Option<&'static ScaleType> {
    SCALE_TYPES.get(key)
}

pub fn scale_keys() -> impl Iterator<Item = &'static str> {
    SCALE_TYPES.keys().copied()
}

/// Pitch-class names of a scale starting on `root`, spelled with sharps:
/// `E` `pentatonic_minor` gives `E G A B D`.
pub fn scale_note_names(root: &str, key: &str) -> Result<Vec<&'static str>> {
    let scale = scale_type(key).ok_or_else(|| Error::invalid("scale", format!("unknown scale {key:?}")))?;
    let root = pitch_class(root)?;
    Ok(scale
        .intervals
        .iter()
        .map(|&semitones| NOTE_NAMES[(root + semitones as usize) % 12])
        .collect())
}

/// Ascending frequencies of one octave of a scale, starting on `root` (a
/// pitch class such as `E`, `F#` or `Bb`) in the fourth octave.
pub fn scale_frequencies(root: &str, key: &str, reference: f32) -> Result<Vec<f32>> {
    let scale = scale_type(key).ok_or_else(|| Error::invalid("scale", format!("unknown scale {key:?}")))?;
    if root.is_empty() || root.chars().any(|c| c.is_ascii_digit()) {
        return Err(Error::invalid("root", format!("{root:?} is not a pitch class")));
    }
    let root_hz = note_frequency(&format!("{root}{SCALE_OCTAVE}"), reference)?;
    Ok(scale
        .intervals
        .iter()
        .map(|&semitones| root_hz * 2f32.powf(semitones as f32 / 12.0))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn every_scale_starts_on_the_root() {
        assert_eq!(scale_keys().count(), 12);
        for key in scale_keys() {
            let scale = scale_type(key).unwrap();
            assert_eq!(scale.intervals[0], 0, "{key}");
            assert!(scale.intervals.windows(2).all(|w| w[0] < w[1]), "{key}");
        }
    }

    #[test]
    fn note_names_follow_the_intervals() {
        assert_eq!(scale_note_names("C", "major").unwrap(), ["C", "D", "E", "F", "G", "A", "B"]);
        assert_eq!(scale_note_names("E", "pentatonic_minor").unwrap(), ["E", "G", "A", "B", "D"]);
        assert_eq!(scale_note_names("Bb", "blues").unwrap(), ["A#", "C#", "D#", "E", "F", "G#"]);
        assert!(scale_note_names("E", "bebop").is_err());
        assert!(scale_note_names("E4", "major").is_err());
    }

    #[test]
    fn step_patterns() {
        assert_eq!(scale_type("major").unwrap().step_pattern(), "W W H W W W H");
        assert_eq!(scale_type("harmonic_minor").unwrap().step_pattern(), "W H W W H W+H H");
        assert_eq!(scale_type("blues").unwrap().step_pattern(), "W+H W H H W+H W");
    }

    #[test]
    fn a_minor_pentatonic_frequencies() {
        let freqs = scale_frequencies("A", "pentatonic_minor", 440.0).unwrap();
        let expected = [440.0, 523.25, 587.33, 659.26, 783.99];
        assert_eq!(freqs.len(), expected.len());
        for (f, e) in freqs.iter().zip(expected) {
            assert_relative_eq!(*f, e, epsilon = 0.02);
        }
    }

    #[test]
    fn c_major_starts_at_middle_c() {
        let freqs = scale_frequencies("C", "major", 440.0).unwrap();
        assert_relative_eq!(freqs[0], 261.63, epsilon = 0.01);
        assert_relative_eq!(freqs[6], 493.88, epsilon = 0.01);
    }

    #[test]
    fn reference_pitch_shifts_the_scale() {
        let at_440 = scale_frequencies("G", "major", 440.0).unwrap();
        let at_432 = scale_frequencies("G", "major", 432.0).unwrap();
        assert_relative_eq!(at_432[0] / at_440[0], 432.0 / 440.0, epsilon = 1e-5);
    }

    #[test]
    fn rejects_unknown_scale_and_bad_root() {
        assert!(scale_frequencies("C", "bebop", 440.0).is_err());
        assert!(scale_frequencies("H", "major", 440.0).is_err());
        assert!(scale_frequencies("C4", "major", 440.0).is_err());
    }
}
