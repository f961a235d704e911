//! # Pitch Detection Module
//!
//! Spectral peak picking for a monophonic guitar signal, and the
//! [`PitchDetector`] that runs it continuously on a live input.
//!
//! Per analysis frame the detector:
//! 1. takes the smoothed dB spectrum from a [`SpectrumAnalyser`],
//! 2. picks the loudest bin and drops the frame if it is below the noise floor,
//! 3. converts the bin to Hz (optionally refining it between bins),
//! 4. drops the frame if the frequency is outside the guitar's fundamental range,
//! 5. names the nearest note and its deviation from the current reference pitch.
//!
//! A dropped frame is not an error: the last valid estimate stays current.
//!
//! Peak picking assumes a single plucked string. It is not robust to chords
//! or to strings whose second harmonic is louder than the fundamental.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::PitchEstimate;
use crate::config::TunerConfig;
use crate::error::{Error, Result};
use crate::fft::{SpectrumAnalyser, bin_to_frequency};
use crate::graph::ToneRequest;
use crate::input::{CaptureHandle, InputDevice};
use crate::synth::ToneSynthesizer;
use crate::tuning::{estimate_for_frequency, open_string_frequency, validate_reference_pitch};

/// Capacity of the estimate stream. Estimates beyond it are dropped until the
/// consumer catches up.
const ESTIMATE_BACKLOG: usize = 64;

/// Frames buffered between the input device and the analysis thread.
const FRAME_BACKLOG: usize = 32;

/// Finds the loudest bin. NaN bins are ignored.
///
/// # Returns
/// * `Some((bin, level))` - Index and value of the maximum
/// * `None` - The spectrum is empty or has no comparable values
pub fn find_peak(spectrum: &[f32]) -> Option<(usize, f32)> {
    spectrum
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Refines a peak bin to a fractional bin by fitting a parabola through the
/// peak and its two neighbours.
///
/// The spectrum must be in a logarithmic unit (dB); a Gaussian-like peak is a
/// parabola there. Falls back to the integer bin at the edges or when a
/// neighbour is silent.
pub fn refine_peak_bin(spectrum_db: &[f32], peak: usize) -> f32 {
    if peak == 0 || peak + 1 >= spectrum_db.len() {
        return peak as f32;
    }

    let y1 = spectrum_db[peak - 1];
    let y2 = spectrum_db[peak];
    let y3 = spectrum_db[peak + 1];
    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return peak as f32;
    }

    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-6 {
        return peak as f32;
    }

    let shift = (y3 - y1) / (2.0 * denominator);
    if shift.abs() > 0.5 {
        return peak as f32;
    }
    peak as f32 + shift
}

/// Runs one frame of pitch detection on a dB spectrum holding the first half
/// of an `2 * spectrum_db.len()`-point transform.
///
/// # Returns
/// * `Some(estimate)` - A pitch was found in range
/// * `None` - Silence, noise below the floor, or a peak outside the range
pub fn detect_pitch(
    spectrum_db: &[f32],
    sample_rate: u32,
    config: &TunerConfig,
    reference: f32,
) -> Option<PitchEstimate> {
    let (peak, level) = find_peak(spectrum_db)?;
    if level < config.noise_floor_db {
        return None;
    }

    let bin = if config.refine_peak {
        refine_peak_bin(spectrum_db, peak)
    } else {
        peak as f32
    };
    let frequency = bin_to_frequency(bin, sample_rate, spectrum_db.len() * 2);
    if frequency <= config.min_frequency || frequency >= config.max_frequency {
        log::trace!("Peak at {frequency:.1} Hz is outside the tuning range");
        return None;
    }

    estimate_for_frequency(frequency, reference, config.in_tune_cents)
}

/// A running analysis: the open input device and the thread reading it.
struct Listener {
    capture: CaptureHandle,
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

/// Live tuner. Idle until [`start_listening`](Self::start_listening), which
/// opens the input device and starts analysing; [`stop_listening`] or
/// dropping the detector releases the device again.
///
/// [`stop_listening`]: Self::stop_listening
pub struct PitchDetector {
    config: TunerConfig,
    synth: ToneSynthesizer,
    input: Box<dyn InputDevice>,
    reference: Arc<AtomicU32>,
    latest: Arc<Mutex<Option<PitchEstimate>>>,
    estimates_tx: Sender<PitchEstimate>,
    estimates_rx: Receiver<PitchEstimate>,
    listener: Option<Listener>,
}

impl std::fmt::Debug for PitchDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PitchDetector")
            .field("listening", &self.is_listening())
            .field("reference_pitch", &self.reference_pitch())
            .finish_non_exhaustive()
    }
}

impl PitchDetector {
    pub fn new(config: TunerConfig, synth: ToneSynthesizer, input: impl InputDevice + 'static) -> Result<Self> {
        config.validate()?;
        let reference = validate_reference_pitch(config.reference_pitch)?;
        let (estimates_tx, estimates_rx) = crossbeam_channel::bounded(ESTIMATE_BACKLOG);
        Ok(Self {
            config,
            synth,
            input: Box::new(input),
            reference: Arc::new(AtomicU32::new(reference.to_bits())),
            latest: Arc::new(Mutex::new(None)),
            estimates_tx,
            estimates_rx,
            listener: None,
        })
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Opens the input device and starts the analysis loop. Already listening
    /// is a no-op.
    ///
    /// # Errors
    /// [`Error::PermissionDenied`] when the device cannot be opened; the
    /// detector stays idle.
    pub fn start_listening(&mut self) -> Result<()> {
        if self.listener.is_some() {
            return Ok(());
        }

        let (frames_tx, frames_rx) = crossbeam_channel::bounded::<Vec<f32>>(FRAME_BACKLOG);
        let capture = self
            .input
            .open(frames_tx, self.config.analysis_rate_hz)
            .map_err(|e| {
                log::warn!("Microphone unavailable: {e:#}");
                Error::PermissionDenied(format!("{e:#}"))
            })?;

        let sample_rate = capture.sample_rate();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let mut analyser = SpectrumAnalyser::new(self.config.fft_size, self.config.smoothing);
        let config = self.config.clone();
        let reference = self.reference.clone();
        let latest = self.latest.clone();
        let estimates_tx = self.estimates_tx.clone();

        let thread = thread::Builder::new()
            .name("pitch-analysis".into())
            .spawn(move || {
                log::debug!("Pitch analysis running at {sample_rate} Hz");
                loop {
                    crossbeam_channel::select! {
                        recv(frames_rx) -> msg => match msg {
                            Ok(frame) => {
                                analyser.push_samples(&frame);
                                let spectrum = analyser.analyse();
                                let reference = f32::from_bits(reference.load(Ordering::Acquire));
                                if let Some(estimate) = detect_pitch(&spectrum, sample_rate, &config, reference) {
                                    *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(estimate.clone());
                                    // A full stream drops the estimate; analysis must not block.
                                    let _ = estimates_tx.try_send(estimate);
                                }
                            }
                            Err(_) => {
                                log::debug!("Input frames closed");
                                break;
                            }
                        },
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                log::debug!("Pitch analysis stopped");
            })?;

        self.listener = Some(Listener {
            capture,
            shutdown_tx,
            thread: Some(thread),
        });
        log::info!("Tuner listening ({} point FFT at {sample_rate} Hz)", self.config.fft_size);
        Ok(())
    }

    /// Releases the input device and stops the analysis loop. Calling it on
    /// an idle detector does nothing.
    pub fn stop_listening(&mut self) {
        let Some(mut listener) = self.listener.take() else {
            return;
        };
        listener.capture.release();
        let _ = listener.shutdown_tx.send(());
        if let Some(thread) = listener.thread.take() {
            if thread.join().is_err() {
                log::error!("Pitch analysis thread panicked");
            }
        }
        log::info!("Tuner stopped listening");
    }

    /// Starts or stops listening. Returns whether the detector is now
    /// listening.
    pub fn toggle_listening(&mut self) -> Result<bool> {
        if self.is_listening() {
            self.stop_listening();
        } else {
            self.start_listening()?;
        }
        Ok(self.is_listening())
    }

    /// The most recent valid estimate. Survives stopping, so a display can
    /// keep showing the last reading.
    pub fn latest(&self) -> Option<PitchEstimate> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Stream of every new estimate, in analysis order.
    pub fn estimates(&self) -> Receiver<PitchEstimate> {
        self.estimates_rx.clone()
    }

    pub fn reference_pitch(&self) -> f32 {
        f32::from_bits(self.reference.load(Ordering::Acquire))
    }

    /// Sets the frequency of A4 for every following frame. Past estimates are
    /// left as they were.
    pub fn set_reference_pitch(&self, hz: f32) -> Result<()> {
        let hz = validate_reference_pitch(hz)?;
        self.reference.store(hz.to_bits(), Ordering::Release);
        log::info!("Reference pitch set to A4 = {hz} Hz");
        Ok(())
    }

    /// Plays the reference tone of an open string (`E2`, `A2`, `D3`, `G3`,
    /// `B3` or `E4`).
    pub fn play_reference(&self, string_name: &str) -> Result<ToneRequest> {
        let frequency = open_string_frequency(string_name)
            .ok_or_else(|| Error::invalid("string", format!("{string_name:?} is not an open string")))?;
        self.synth
            .play_tone(frequency, self.synth.config().reference_duration)
    }
}

impl Drop for PitchDetector {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SynthConfig;
    use crate::context::AudioContextManager;
    use crate::input::SyntheticInput;
    use crate::offline::OfflineBackend;
    use crate::tuning::Accuracy;
    use std::time::Duration;

    struct DeniedInput;

    impl InputDevice for DeniedInput {
        fn open(&mut self, _frames: Sender<Vec<f32>>, _fps: u32) -> anyhow::Result<CaptureHandle> {
            Err(anyhow::anyhow!("Permission denied by user"))
        }
    }

    fn spectrum_with_peak(bins: usize, peak: usize, level: f32) -> Vec<f32> {
        let mut spectrum = vec![-100.0; bins];
        spectrum[peak] = level;
        spectrum
    }

    fn synth() -> (ToneSynthesizer, OfflineBackend) {
        let backend = OfflineBackend::new(44100);
        let context = AudioContextManager::shared(backend.clone());
        context.resume().unwrap();
        (ToneSynthesizer::new(context, SynthConfig::default()), backend)
    }

    fn detector(input: impl InputDevice + 'static) -> PitchDetector {
        let (synth, _backend) = synth();
        PitchDetector::new(TunerConfig::default(), synth, input).unwrap()
    }

    #[test]
    fn peak_is_the_loudest_bin() {
        assert_eq!(find_peak(&[-80.0, -20.0, f32::NAN, -30.0]), Some((1, -20.0)));
        assert_eq!(find_peak(&[]), None);
        assert_eq!(find_peak(&[f32::NAN]), None);
    }

    #[test]
    fn peak_below_noise_floor_is_dropped() {
        let config = TunerConfig::default();
        // 10 Hz bins: bin 22 is 220 Hz.
        let spectrum = spectrum_with_peak(2048, 22, -60.0);
        assert!(detect_pitch(&spectrum, 40960, &config, 440.0).is_none());
        assert!(detect_pitch(&vec![f32::NEG_INFINITY; 2048], 40960, &config, 440.0).is_none());
    }

    #[test]
    fn peak_outside_guitar_range_is_dropped() {
        let config = TunerConfig::default();
        let low = spectrum_with_peak(2048, 5, -10.0);
        let high = spectrum_with_peak(2048, 44, -10.0);
        assert!(detect_pitch(&low, 40960, &config, 440.0).is_none());
        assert!(detect_pitch(&high, 40960, &config, 440.0).is_none());
    }

    #[test]
    fn range_edges_are_excluded() {
        let config = TunerConfig::default();
        // 10 Hz bins: bin 40 is 400 Hz.
        let top = spectrum_with_peak(2048, 40, -10.0);
        assert!(detect_pitch(&top, 40960, &config, 440.0).is_none());
        // 7.5 Hz bins: bin 10 is 75 Hz, bin 11 is 82.5 Hz.
        let bottom = spectrum_with_peak(2048, 10, -10.0);
        assert!(detect_pitch(&bottom, 30720, &config, 440.0).is_none());
        let above_bottom = spectrum_with_peak(2048, 11, -10.0);
        assert_eq!(detect_pitch(&above_bottom, 30720, &config, 440.0).unwrap().note_name, "E2");
    }

    #[test]
    fn inconsistent_config_is_rejected() {
        for config in [
            TunerConfig { fft_size: 0, ..TunerConfig::default() },
            TunerConfig { fft_size: 3000, ..TunerConfig::default() },
            TunerConfig { min_frequency: 400.0, max_frequency: 75.0, ..TunerConfig::default() },
            TunerConfig { min_frequency: f32::NAN, ..TunerConfig::default() },
        ] {
            let (synth, _backend) = synth();
            let err = PitchDetector::new(config, synth, SyntheticInput::silence(8000)).unwrap_err();
            assert!(matches!(err, Error::InvalidParameter { .. }));
        }
    }

    #[test]
    fn peak_in_range_names_the_note() {
        let config = TunerConfig::default();
        let spectrum = spectrum_with_peak(2048, 11, -10.0);
        let estimate = detect_pitch(&spectrum, 40960, &config, 440.0).unwrap();
        assert_eq!(estimate.note_name, "A2");
        assert_eq!(estimate.frequency_hz, 110.0);
        assert_eq!(estimate.accuracy, Accuracy::InTune);
    }

    #[test]
    fn refinement_moves_towards_the_louder_neighbour() {
        let spectrum = [-60.0, -30.0, -20.0, -25.0, -60.0];
        let refined = refine_peak_bin(&spectrum, 2);
        assert!(refined > 2.0 && refined < 2.5, "{refined}");
        assert_eq!(refine_peak_bin(&spectrum, 0), 0.0);
        assert_eq!(refine_peak_bin(&[-20.0, f32::NEG_INFINITY, -30.0], 1), 1.0);
    }

    #[test]
    fn refinement_improves_an_off_bin_tone() {
        let sample_rate = 44100;
        let fft_size = 4096;
        let frequency = 110.0f32;
        let signal: Vec<f32> = (0..fft_size)
            .map(|i| 0.5 * (std::f32::consts::TAU * frequency * i as f32 / sample_rate as f32).sin())
            .collect();
        let mut analyser = SpectrumAnalyser::new(fft_size, 0.0);
        analyser.push_samples(&signal);
        let spectrum = analyser.analyse();

        let (peak, _) = find_peak(&spectrum).unwrap();
        let coarse = bin_to_frequency(peak as f32, sample_rate, fft_size);
        let fine = bin_to_frequency(refine_peak_bin(&spectrum, peak), sample_rate, fft_size);
        assert!((fine - frequency).abs() < (coarse - frequency).abs());
        assert!((fine - frequency).abs() < 1.0, "{fine}");
    }

    #[test]
    fn denied_microphone_leaves_detector_idle() {
        let mut detector = detector(DeniedInput);
        let err = detector.start_listening().unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
        assert!(!detector.is_listening());
        assert!(detector.latest().is_none());
    }

    #[test]
    fn stop_listening_is_idempotent() {
        let mut detector = detector(SyntheticInput::silence(8000));
        detector.stop_listening();
        detector.start_listening().unwrap();
        detector.stop_listening();
        detector.stop_listening();
        assert!(!detector.is_listening());
    }

    #[test]
    fn stopping_releases_the_microphone() {
        let input = SyntheticInput::silence(8000).with_frame_interval(Duration::from_millis(1));
        let mut detector = detector(input.clone());
        detector.start_listening().unwrap();
        assert!(input.is_open());
        detector.stop_listening();
        assert!(!input.is_open());
    }

    #[test]
    fn dropping_releases_the_microphone() {
        let input = SyntheticInput::silence(8000).with_frame_interval(Duration::from_millis(1));
        let mut detector = detector(input.clone());
        detector.start_listening().unwrap();
        drop(detector);
        assert!(!input.is_open());
    }

    #[test]
    fn toggle_switches_listening() {
        let mut detector = detector(SyntheticInput::silence(8000));
        assert!(detector.toggle_listening().unwrap());
        assert!(!detector.toggle_listening().unwrap());
    }

    #[test]
    fn detects_a_steady_tone() {
        // 40960 Hz / 4096 points puts 220 Hz exactly on bin 22.
        let input = SyntheticInput::tone(40960, 220.0, 0.5).with_frame_interval(Duration::from_millis(1));
        let mut detector = detector(input);
        let estimates = detector.estimates();
        detector.start_listening().unwrap();

        // Let the window fill and the smoothing settle.
        let mut estimate = estimates.recv_timeout(Duration::from_secs(5)).unwrap();
        for _ in 0..10 {
            estimate = estimates.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(estimate.note_name, "A3");
        assert_eq!(estimate.frequency_hz, 220.0);
        assert_eq!(estimate.cents_deviation, 0);
        assert_eq!(estimate.accuracy, Accuracy::InTune);

        detector.stop_listening();
        assert_eq!(detector.latest().map(|e| e.note_name), Some("A3".to_string()));
    }

    #[test]
    fn silence_produces_no_estimate() {
        let input = SyntheticInput::silence(40960).with_frame_interval(Duration::from_millis(1));
        let mut detector = detector(input);
        let estimates = detector.estimates();
        detector.start_listening().unwrap();
        assert!(estimates.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(detector.latest().is_none());
    }

    #[test]
    fn reference_pitch_is_validated() {
        let detector = detector(SyntheticInput::silence(8000));
        detector.set_reference_pitch(432.0).unwrap();
        assert_eq!(detector.reference_pitch(), 432.0);
        assert!(detector.set_reference_pitch(880.0).is_err());
        assert_eq!(detector.reference_pitch(), 432.0);
    }

    #[test]
    fn reference_tones_are_open_strings_only() {
        let (synth, backend) = synth();
        let detector = PitchDetector::new(TunerConfig::default(), synth, SyntheticInput::silence(8000)).unwrap();

        let tone = detector.play_reference("A2").unwrap();
        assert_eq!(tone.frequency, 110.0);
        assert_eq!(tone.duration_seconds, 2.0);
        assert_eq!(backend.scheduled().len(), 1);

        assert!(detector.play_reference("C4").is_err());
        assert_eq!(backend.scheduled().len(), 1);
    }
}
