//! Tuner tests against generated input.
//!
//! 40960 Hz with a 4096-point transform gives 10 Hz bins, so the test tones
//! land exactly on a bin and the expected readings are exact.

use std::time::Duration;

use crossbeam_channel::Sender;
use practice_core::input::CaptureHandle;
use practice_core::{
    Accuracy, EngineConfig, Error, InputDevice, OfflineBackend, PitchEstimate, PracticeEngine, SyntheticInput,
};

const SAMPLE_RATE: u32 = 40960;

fn engine_with(input: impl InputDevice + 'static) -> PracticeEngine {
    PracticeEngine::new(EngineConfig::default(), OfflineBackend::new(48000), input).unwrap()
}

fn tone(frequency: f32) -> SyntheticInput {
    SyntheticInput::tone(SAMPLE_RATE, frequency, 0.5).with_frame_interval(Duration::from_millis(1))
}

/// Waits for the smoothed spectrum to settle and returns the reading.
fn settled_estimate(engine: &PracticeEngine) -> PitchEstimate {
    let estimates = engine.tuner_estimates();
    let mut estimate = None;
    for _ in 0..12 {
        estimate = Some(estimates.recv_timeout(Duration::from_secs(5)).unwrap());
    }
    estimate.unwrap()
}

#[test]
fn reads_an_in_tune_high_e_string() {
    let mut engine = engine_with(tone(330.0));
    engine.start_listening().unwrap();
    let estimate = settled_estimate(&engine);

    assert_eq!(estimate.note_name, "E4");
    assert_eq!(estimate.frequency_hz, 330.0);
    // 1200 * log2(330 / 329.63) = 1.9
    assert_eq!(estimate.cents_deviation, 2);
    assert_eq!(estimate.accuracy, Accuracy::InTune);
}

#[test]
fn reference_pitch_changes_the_reading() {
    let mut engine = engine_with(tone(330.0));
    engine.set_reference_pitch(432.0).unwrap();
    engine.start_listening().unwrap();
    let estimate = settled_estimate(&engine);

    // E4 is 323.6 Hz when A4 is 432 Hz.
    assert_eq!(estimate.note_name, "E4");
    assert_eq!(estimate.cents_deviation, 34);
    assert_eq!(estimate.accuracy, Accuracy::Sharp);
}

#[test]
fn flat_string_reads_flat() {
    // 290 Hz against D4 at 293.66 Hz.
    let mut engine = engine_with(tone(290.0));
    engine.start_listening().unwrap();
    let estimate = settled_estimate(&engine);

    assert_eq!(estimate.note_name, "D4");
    assert_eq!(estimate.cents_deviation, -22);
    assert_eq!(estimate.accuracy, Accuracy::Flat);
}

#[test]
fn last_reading_survives_stopping() {
    let mut engine = engine_with(tone(110.0));
    engine.start_listening().unwrap();
    let estimate = settled_estimate(&engine);
    engine.stop_listening();

    assert_eq!(engine.tuner_reading(), Some(estimate));
    assert!(!engine.is_listening());
}

#[test]
fn stop_listening_twice_is_harmless() {
    let mut engine = engine_with(tone(110.0));
    engine.stop_listening();
    engine.start_listening().unwrap();
    engine.stop_listening();
    let reading = engine.tuner_reading();
    engine.stop_listening();
    assert!(!engine.is_listening());
    assert_eq!(engine.tuner_reading(), reading);
}

#[test]
fn microphone_is_released_when_the_engine_is_dropped() {
    let input = tone(110.0);
    let mut engine = engine_with(input.clone());
    engine.start_listening().unwrap();
    assert!(input.is_open());

    drop(engine);
    assert!(!input.is_open());
}

#[test]
fn listening_can_restart_after_stopping() {
    let input = tone(220.0);
    let mut engine = engine_with(input.clone());
    assert!(engine.toggle_listening().unwrap());
    assert!(!engine.toggle_listening().unwrap());
    assert!(!input.is_open());
    assert!(engine.toggle_listening().unwrap());
    assert!(input.is_open());
    assert_eq!(settled_estimate(&engine).note_name, "A3");
}

struct RefusedMicrophone;

impl InputDevice for RefusedMicrophone {
    fn open(&mut self, _frames: Sender<Vec<f32>>, _frames_per_second: u32) -> anyhow::Result<CaptureHandle> {
        anyhow::bail!("Microphone access was refused")
    }
}

#[test]
fn refused_microphone_reports_permission_denied() {
    let mut engine = engine_with(RefusedMicrophone);
    let err = engine.start_listening().unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
    assert!(err.to_string().contains("refused"));
    assert!(!engine.is_listening());
    assert!(engine.tuner_reading().is_none());
}

#[test]
fn reference_tones_play_open_strings() {
    let backend = OfflineBackend::new(48000);
    let engine = PracticeEngine::new(EngineConfig::default(), backend.clone(), SyntheticInput::silence(8000)).unwrap();

    for (string, frequency) in [("E2", 82.41), ("A2", 110.0), ("D3", 146.83), ("G3", 196.0), ("B3", 246.94), ("E4", 329.63)] {
        assert_eq!(engine.play_reference(string).unwrap().frequency, frequency);
    }
    assert!(matches!(engine.play_reference("A4"), Err(Error::InvalidParameter { .. })));

    let scheduled = backend.scheduled();
    assert_eq!(scheduled.len(), 6);
    assert!(scheduled.iter().all(|v| v.tone.duration_seconds == 2.0 && v.tone.gain == 0.3));
}
