//! Chord, tone and scale playback through the engine, rendered offline.

use practice_core::graph::Waveform;
use practice_core::synth::DEFAULT_CHORD;
use practice_core::{ContextState, EngineConfig, OfflineBackend, PracticeEngine, SyntheticInput};

const SAMPLE_RATE: u32 = 48000;

fn engine() -> (PracticeEngine, OfflineBackend) {
    let backend = OfflineBackend::new(SAMPLE_RATE);
    let engine = PracticeEngine::new(EngineConfig::default(), backend.clone(), SyntheticInput::silence(8000)).unwrap();
    (engine, backend)
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().map(|s| s.abs()).fold(0.0, f32::max)
}

#[test]
fn progression_schedules_one_chord_per_measure() {
    let (engine, backend) = engine();
    let schedule = engine.play_chord_progression(&["C", "Am", "F", "G"], 120.0).unwrap();

    let starts: Vec<f64> = schedule.iter().map(|c| c.start_time).collect();
    assert_eq!(starts, [0.0, 2.0, 4.0, 6.0]);
    let names: Vec<&str> = schedule.iter().map(|c| c.voicing.name).collect();
    assert_eq!(names, ["C", "Am", "F", "G"]);

    let voices = backend.scheduled();
    assert!(voices.iter().all(|v| v.tone.waveform == Waveform::Triangle));
    assert!(voices.iter().all(|v| v.tone.gain == 0.1));
    let mut voice_starts: Vec<f64> = voices.iter().map(|v| v.start_time).collect();
    voice_starts.dedup();
    assert_eq!(voice_starts, [0.0, 2.0, 4.0, 6.0]);
}

#[test]
fn progression_starts_at_the_current_context_time() {
    let (engine, backend) = engine();
    engine.resume().unwrap();
    backend.advance(1.5);

    let schedule = engine.play_chord_progression(&["G", "D"], 60.0).unwrap();
    assert_eq!(schedule[0].start_time, 1.5);
    assert_eq!(schedule[1].start_time, 5.5);
    assert_eq!(schedule[1].offset, 4.0);
}

#[test]
fn unknown_chords_play_the_fallback_voicing() {
    let (engine, backend) = engine();
    let schedule = engine.play_chord_progression(&["Em", "Gadd9"], 120.0).unwrap();

    assert_eq!(schedule[1].requested, "Gadd9");
    assert_eq!(schedule[1].voicing.name, DEFAULT_CHORD);
    let fallback: Vec<f32> = backend
        .scheduled()
        .iter()
        .filter(|v| v.start_time == 2.0)
        .map(|v| v.tone.frequency)
        .collect();
    assert_eq!(fallback, [261.63, 329.63, 392.0]);
}

#[test]
fn reference_tone_swells_in_and_fades_out() {
    let (engine, backend) = engine();
    engine.play_reference_tone(440.0, 2.0).unwrap();

    let attack = backend.render(SAMPLE_RATE as usize / 100);
    let body = backend.render(SAMPLE_RATE as usize / 10);
    let tail = backend.render(SAMPLE_RATE as usize * 19 / 10);
    let after = backend.render(SAMPLE_RATE as usize / 10);

    // 10 ms into a 100 ms linear attack.
    assert!(peak(&attack) < 0.04);
    assert!(peak(&body) > 0.25 && peak(&body) <= 0.3);
    // Nearly silent over the last 100 ms.
    assert!(peak(&tail[tail.len() - 4800..]) < 0.01);
    assert!(after.iter().all(|&s| s == 0.0));
}

#[test]
fn short_tone_fades_out_instead_of_cutting_off() {
    let (engine, backend) = engine();
    engine.play_reference_tone(1000.0, 0.05).unwrap();

    let tone = backend.render(SAMPLE_RATE as usize / 20);
    assert!(peak(&tone) > 0.25);
    // Last 2 ms.
    assert!(peak(&tone[tone.len() - 96..]) < 0.01);
}

#[test]
fn invalid_tone_requests_are_rejected() {
    let (engine, backend) = engine();
    assert!(engine.play_reference_tone(-110.0, 1.0).is_err());
    assert!(engine.play_reference_tone(110.0, 0.0).is_err());
    assert!(engine.play_chord_progression(&["C"], -60.0).is_err());
    assert!(backend.scheduled().is_empty());
}

#[test]
fn scale_plays_ascending_notes_in_time() {
    let (engine, backend) = engine();
    let starts = engine.play_scale("E", "pentatonic_minor", 240.0).unwrap();
    assert_eq!(starts, [0.0, 0.25, 0.5, 0.75, 1.0]);

    let frequencies: Vec<f32> = backend.scheduled().iter().map(|v| v.tone.frequency).collect();
    assert!(frequencies.windows(2).all(|w| w[0] < w[1]));
    assert!((frequencies[0] - 329.63).abs() < 0.01);
}

#[test]
fn every_component_shares_one_context() {
    let (mut engine, backend) = engine();
    engine.start_metronome().unwrap();
    engine.start_listening().unwrap();
    engine.play_reference_tone(196.0, 1.0).unwrap();
    engine.play_chord_progression(&["A"], 100.0).unwrap();
    engine.play_reference("E2").unwrap();

    assert_eq!(backend.open_count(), 1);
    assert_eq!(engine.context_state(), ContextState::Running);
    engine.shutdown();
    assert!(backend.is_closed());
}
