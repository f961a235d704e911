//! The practice engine: one audio context shared by the metronome, the tuner
//! and chord/tone playback, behind the surface the UI layer calls into.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::PitchEstimate;
use crate::audio::{CpalInput, CpalOutput};
use crate::config::EngineConfig;
use crate::context::{AudioBackend, AudioContextManager, ContextState};
use crate::error::Result;
use crate::graph::ToneRequest;
use crate::input::InputDevice;
use crate::pitch::PitchDetector;
use crate::scales::scale_frequencies;
use crate::scheduler::{BeatClock, BeatScheduler, TimeSignature};
use crate::synth::{ScheduledChord, ToneSynthesizer};
use crate::timing::TimingReport;

pub struct PracticeEngine {
    config: EngineConfig,
    context: Arc<AudioContextManager>,
    synth: ToneSynthesizer,
    metronome: BeatScheduler,
    tuner: PitchDetector,
}

impl std::fmt::Debug for PracticeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PracticeEngine")
            .field("context", &self.context)
            .field("metronome", &self.metronome)
            .field("tuner", &self.tuner)
            .finish_non_exhaustive()
    }
}

impl PracticeEngine {
    /// Builds the engine on the given output and input.
    ///
    /// A missing audio output is not fatal: the engine is created with
    /// playback disabled and every sound request becomes a logged no-op.
    pub fn new(
        config: EngineConfig,
        backend: impl AudioBackend + 'static,
        input: impl InputDevice + 'static,
    ) -> Result<Self> {
        config.validate()?;

        let context = AudioContextManager::shared(backend);
        if let Err(e) = context.init() {
            log::warn!("Playback disabled: {e}");
        }
        let synth = ToneSynthesizer::new(context.clone(), config.synth.clone());
        let metronome = BeatScheduler::new(config.metronome.clone(), synth.clone())?;
        let tuner = PitchDetector::new(config.tuner.clone(), synth.clone(), input)?;

        Ok(Self {
            config,
            context,
            synth,
            metronome,
            tuner,
        })
    }

    /// Builds the engine on the default sound card and microphone.
    pub fn with_default_devices(config: EngineConfig) -> Result<Self> {
        let input = CpalInput::new(config.audio.preferred_sample_rate);
        Self::new(config, CpalOutput::new(), input)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<AudioContextManager> {
        &self.context
    }

    pub fn context_state(&self) -> ContextState {
        self.context.state()
    }

    pub fn synth(&self) -> &ToneSynthesizer {
        &self.synth
    }

    pub fn metronome(&self) -> &BeatScheduler {
        &self.metronome
    }

    pub fn tuner(&self) -> &PitchDetector {
        &self.tuner
    }

    /// Resumes the audio context. Call from a user action before playback.
    pub fn resume(&self) -> Result<()> {
        self.context.resume()
    }

    fn resume_for_playback(&self) {
        if let Err(e) = self.context.resume() {
            log::warn!("Cannot resume audio for playback: {e}");
        }
    }

    // Metronome

    pub fn start_metronome(&mut self) -> Result<()> {
        self.metronome.start()
    }

    pub fn stop_metronome(&mut self) {
        self.metronome.stop();
    }

    pub fn toggle_metronome(&mut self) -> Result<bool> {
        self.metronome.toggle()
    }

    pub fn set_bpm(&self, bpm: f64) -> Result<f64> {
        self.metronome.set_bpm(bpm)
    }

    pub fn set_time_signature(&self, [numerator, denominator]: [u32; 2]) -> Result<TimeSignature> {
        let time_signature = TimeSignature::new(numerator, denominator)?;
        self.metronome.set_time_signature(time_signature);
        Ok(time_signature)
    }

    pub fn set_volume(&self, volume: f32) -> Result<f32> {
        self.metronome.set_volume(volume)
    }

    pub fn set_accent_enabled(&self, enabled: bool) {
        self.metronome.set_accent_enabled(enabled);
    }

    pub fn current_beat_index(&self) -> u32 {
        self.metronome.current_beat_index()
    }

    pub fn beat_clock(&self) -> BeatClock {
        self.metronome.beat_clock()
    }

    pub fn metronome_timing(&self) -> Option<TimingReport> {
        self.metronome.timing_report()
    }

    // Tuner

    pub fn start_listening(&mut self) -> Result<()> {
        self.tuner.start_listening()
    }

    pub fn stop_listening(&mut self) {
        self.tuner.stop_listening();
    }

    pub fn toggle_listening(&mut self) -> Result<bool> {
        self.tuner.toggle_listening()
    }

    pub fn is_listening(&self) -> bool {
        self.tuner.is_listening()
    }

    pub fn set_reference_pitch(&self, hz: f32) -> Result<()> {
        self.tuner.set_reference_pitch(hz)
    }

    pub fn reference_pitch(&self) -> f32 {
        self.tuner.reference_pitch()
    }

    /// Plays the reference tone of an open string.
    pub fn play_reference(&self, string_name: &str) -> Result<ToneRequest> {
        self.resume_for_playback();
        self.tuner.play_reference(string_name)
    }

    /// The last valid tuner reading: note, frequency, cents and accuracy.
    pub fn tuner_reading(&self) -> Option<PitchEstimate> {
        self.tuner.latest()
    }

    pub fn tuner_estimates(&self) -> Receiver<PitchEstimate> {
        self.tuner.estimates()
    }

    // Playback

    pub fn play_reference_tone(&self, frequency_hz: f32, duration_seconds: f64) -> Result<ToneRequest> {
        self.resume_for_playback();
        self.synth.play_tone(frequency_hz, duration_seconds)
    }

    pub fn play_chord_progression<S: AsRef<str>>(&self, chord_names: &[S], bpm: f64) -> Result<Vec<ScheduledChord>> {
        self.resume_for_playback();
        self.synth.play_progression(chord_names, bpm)
    }

    /// Plays one octave of a scale upwards from `root` in the fourth octave,
    /// tuned to the tuner's reference pitch.
    pub fn play_scale(&self, root: &str, scale: &str, notes_per_minute: f64) -> Result<Vec<f64>> {
        let frequencies = scale_frequencies(root, scale, self.tuner.reference_pitch())?;
        self.resume_for_playback();
        self.synth.play_scale(&frequencies, notes_per_minute)
    }

    /// Stops the metronome and the tuner and closes the audio context.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        self.metronome.stop();
        self.tuner.stop_listening();
        self.context.teardown();
    }
}

impl Drop for PracticeEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
