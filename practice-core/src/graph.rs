//! # Audio Graph
//!
//! The minimal signal graph behind every sound the engine makes: oscillator
//! voices with amplitude envelopes, mixed into a single sink.
//!
//! Components never render samples themselves. They build a [`Voice`] with an
//! absolute start time on the context clock and hand it to the
//! [`Destination`]; the [`Renderer`], owned by whatever drives the output
//! device, picks scheduled voices up over a channel and mixes them in the
//! real-time callback. The renderer is also the clock: the context time is
//! the number of frames it has produced divided by the sample rate.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, require_positive};

/// Target level of exponential ramps. An exponential ramp cannot reach zero.
pub const EXP_FLOOR: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Triangle,
}

impl Waveform {
    /// Oscillator output for a phase measured in cycles. Both shapes start at
    /// zero and rise.
    pub fn sample(self, phase: f64) -> f32 {
        match self {
            Waveform::Sine => (TAU * phase).sin() as f32,
            Waveform::Triangle => (1.0 - 4.0 * ((phase + 0.25).fract() - 0.5).abs()) as f32,
        }
    }
}

/// One tone to be played. Created per playback call and discarded once the
/// sound has finished.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToneRequest {
    pub frequency: f32,
    pub duration_seconds: f64,
    pub waveform: Waveform,
    pub gain: f32,
}

impl ToneRequest {
    pub fn new(frequency: f32, duration_seconds: f64, waveform: Waveform, gain: f32) -> Result<Self> {
        require_positive("frequency", frequency as f64)?;
        require_positive("duration", duration_seconds)?;
        if !gain.is_finite() || gain < 0.0 {
            return Err(Error::invalid("gain", format!("must be a non-negative number, got {gain}")));
        }
        Ok(Self {
            frequency,
            duration_seconds,
            waveform,
            gain,
        })
    }
}

/// Amplitude-over-time shape of a voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Envelope {
    /// Starts at full gain and decays exponentially to [`EXP_FLOOR`].
    Percussive,
    /// Rises linearly from silence over `attack` seconds, then decays
    /// exponentially to [`EXP_FLOOR`] by the end of the tone. Tones shorter
    /// than twice the attack spend half their length rising.
    Swell { attack: f64 },
}

impl Envelope {
    /// Gain at `elapsed` seconds into a tone of `duration` seconds peaking at `peak`.
    pub fn gain_at(self, peak: f32, elapsed: f64, duration: f64) -> f32 {
        if elapsed < 0.0 || elapsed >= duration {
            return 0.0;
        }
        match self {
            Envelope::Percussive => exponential_ramp(peak, EXP_FLOOR, elapsed / duration),
            Envelope::Swell { attack } => {
                let attack = attack.clamp(0.0, duration / 2.0);
                if elapsed < attack {
                    peak * (elapsed / attack) as f32
                } else {
                    exponential_ramp(peak, EXP_FLOOR, (elapsed - attack) / (duration - attack))
                }
            }
        }
    }
}

/// v0 * (v1 / v0)^progress
fn exponential_ramp(from: f32, to: f32, progress: f64) -> f32 {
    if from <= 0.0 {
        return 0.0;
    }
    from * (to / from).powf(progress as f32)
}

/// A tone bound to an absolute start time on the context clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voice {
    pub tone: ToneRequest,
    pub envelope: Envelope,
    pub start_time: f64,
}

impl Voice {
    pub fn new(tone: ToneRequest, envelope: Envelope, start_time: f64) -> Self {
        Self {
            tone,
            envelope,
            start_time,
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.tone.duration_seconds
    }

    /// Output of this voice at context time `t`.
    pub fn sample_at(&self, t: f64) -> f32 {
        let elapsed = t - self.start_time;
        let gain = self
            .envelope
            .gain_at(self.tone.gain, elapsed, self.tone.duration_seconds);
        if gain == 0.0 {
            return 0.0;
        }
        self.tone.waveform.sample(self.tone.frequency as f64 * elapsed) * gain
    }
}

#[derive(Debug, Clone)]
pub enum GraphCommand {
    Schedule(Voice),
    /// Drops every pending and sounding voice.
    Silence,
}

/// The receiving end of a context's graph, handed to an [`AudioBackend`]
/// when the context is opened.
///
/// [`AudioBackend`]: crate::context::AudioBackend
#[derive(Debug)]
pub struct GraphPort {
    commands: Receiver<GraphCommand>,
    clock: Arc<AtomicU64>,
}

impl GraphPort {
    pub(crate) fn new(commands: Receiver<GraphCommand>, clock: Arc<AtomicU64>) -> Self {
        Self { commands, clock }
    }
}

/// Mixes scheduled voices into output buffers and advances the context clock.
#[derive(Debug)]
pub struct Renderer {
    port: GraphPort,
    sample_rate: u32,
    voices: Vec<Voice>,
    history: Option<Vec<Voice>>,
}

impl Renderer {
    pub fn new(port: GraphPort, sample_rate: u32) -> Self {
        Self {
            port,
            sample_rate,
            voices: Vec::new(),
            history: None,
        }
    }

    /// Keeps a record of every voice this renderer has received.
    pub fn with_history(mut self) -> Self {
        self.history = Some(Vec::new());
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn history(&self) -> &[Voice] {
        self.history.as_deref().unwrap_or(&[])
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Pulls newly scheduled voices off the command channel.
    pub fn drain_commands(&mut self) {
        for command in self.port.commands.try_iter() {
            match command {
                GraphCommand::Schedule(voice) => {
                    if let Some(history) = self.history.as_mut() {
                        history.push(voice);
                    }
                    self.voices.push(voice);
                }
                GraphCommand::Silence => self.voices.clear(),
            }
        }
    }

    /// Fills an interleaved buffer with the mix of all active voices, writing
    /// the same signal to every channel.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        self.drain_commands();

        let channels = channels.max(1);
        let frames = (out.len() / channels) as u64;
        let first_frame = self.port.clock.load(Ordering::Acquire);
        let sample_rate = self.sample_rate as f64;

        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let t = (first_frame + i as u64) as f64 / sample_rate;
            let mix: f32 = self.voices.iter().map(|voice| voice.sample_at(t)).sum();
            frame.fill(mix.clamp(-1.0, 1.0));
        }

        self.port.clock.fetch_add(frames, Ordering::AcqRel);
        let now = (first_frame + frames) as f64 / sample_rate;
        self.voices.retain(|voice| voice.end_time() > now);
    }
}

/// The terminal sink of a context. Cheap to clone; every component that
/// makes sound holds one.
#[derive(Debug, Clone)]
pub struct Destination {
    commands: Sender<GraphCommand>,
    clock: Arc<AtomicU64>,
    sample_rate: u32,
}

impl Destination {
    pub(crate) fn new(commands: Sender<GraphCommand>, clock: Arc<AtomicU64>, sample_rate: u32) -> Self {
        Self {
            commands,
            clock,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Context time in seconds.
    pub fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    /// Queues a voice. Returns `false` once the renderer is gone.
    pub fn schedule(&self, voice: Voice) -> bool {
        self.commands.send(GraphCommand::Schedule(voice)).is_ok()
    }

    pub fn silence(&self) -> bool {
        self.commands.send(GraphCommand::Silence).is_ok()
    }
}
