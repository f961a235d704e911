//! # Beat Scheduler
//!
//! The metronome. Beats are not timed by the thread that schedules them: a
//! coarse poller wakes up every few tens of milliseconds and schedules, at
//! exact context times, every beat that falls inside a short lookahead
//! window. The next beat time advances by exactly one interval per beat and is
//! anchored to the audio context clock, so poller jitter never reaches the
//! audible beat.
//!
//! ```text
//! poll:       |--25ms--|--25ms--|--25ms--|--25ms--|
//! lookahead:  [====100ms====]
//! beats:      ^ t0                  ^ t0 + 60/bpm
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::config::MetronomeConfig;
use crate::context::ContextState;
use crate::error::{Error, Result};
use crate::synth::ToneSynthesizer;
use crate::timing::TimingReport;

/// Beats per measure and the note value of one beat. The note value is
/// informational: the beat interval is always `60 / bpm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u32; 2]", into = "[u32; 2]")]
pub struct TimeSignature {
    numerator: u32,
    denominator: u32,
}

impl TimeSignature {
    pub const MAX_NUMERATOR: u32 = 32;
    pub const MAX_DENOMINATOR: u32 = 32;

    pub fn new(numerator: u32, denominator: u32) -> Result<Self> {
        if !(1..=Self::MAX_NUMERATOR).contains(&numerator) {
            return Err(Error::invalid(
                "time signature",
                format!("numerator must be in 1..={}, got {numerator}", Self::MAX_NUMERATOR),
            ));
        }
        if !denominator.is_power_of_two() || denominator > Self::MAX_DENOMINATOR {
            return Err(Error::invalid(
                "time signature",
                format!("denominator must be a power of two up to {}, got {denominator}", Self::MAX_DENOMINATOR),
            ));
        }
        Ok(Self { numerator, denominator })
    }

    pub fn numerator(&self) -> u32 {
        self.numerator
    }

    pub fn denominator(&self) -> u32 {
        self.denominator
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl TryFrom<[u32; 2]> for TimeSignature {
    type Error = Error;

    fn try_from([numerator, denominator]: [u32; 2]) -> Result<Self> {
        Self::new(numerator, denominator)
    }
}

impl From<TimeSignature> for [u32; 2] {
    fn from(ts: TimeSignature) -> Self {
        [ts.numerator, ts.denominator]
    }
}

/// Snapshot of the metronome state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BeatClock {
    pub bpm: f64,
    pub time_signature: TimeSignature,
    /// Beat of the measure most recently scheduled, 1-based.
    pub current_beat_index: u32,
    pub accent_enabled: bool,
    pub volume: f32,
    pub running: bool,
}

impl BeatClock {
    pub fn beat_interval(&self) -> f64 {
        60.0 / self.bpm
    }
}

/// A click handed to the synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScheduledBeat {
    /// Context time the click sounds at.
    pub time: f64,
    /// Beat of the measure, 1-based.
    pub beat: u32,
    pub accent: bool,
}

/// Scheduling state shared between the caller and the poller thread.
#[derive(Debug)]
struct SchedulerCore {
    clock: BeatClock,
    /// Beat of the measure the next scheduled click gets.
    next_beat: u32,
    next_beat_time: f64,
    history: VecDeque<f64>,
    history_len: usize,
}

impl SchedulerCore {
    fn reset_measure(&mut self) {
        self.clock.current_beat_index = 1;
        self.next_beat = 1;
    }

    fn record(&mut self, time: f64) {
        if self.history_len == 0 {
            return;
        }
        if self.history.len() == self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(time);
    }

    /// Schedules every beat before `now + lookahead`.
    fn schedule_ahead(&mut self, now: f64, lookahead: f64, synth: &ToneSynthesizer) -> Vec<ScheduledBeat> {
        let mut scheduled = Vec::new();
        if !self.clock.running {
            return scheduled;
        }
        if synth.context().state() == ContextState::Closed {
            log::warn!("Audio context closed under the running metronome; stopping");
            self.clock.running = false;
            self.reset_measure();
            return scheduled;
        }

        let interval = self.clock.beat_interval();
        if now - self.next_beat_time > interval {
            log::warn!(
                "Metronome fell {:.0} ms behind the audio clock; re-anchoring",
                (now - self.next_beat_time) * 1000.0
            );
            self.next_beat_time = now;
            self.history.clear();
        }

        while self.next_beat_time < now + lookahead {
            let beat = self.next_beat;
            let accent = self.clock.accent_enabled && beat == 1;
            let time = self.next_beat_time;
            if let Err(e) = synth.play_click(accent, self.clock.volume, time) {
                log::warn!("Failed to schedule click: {e}");
            }

            self.clock.current_beat_index = beat;
            self.record(time);
            scheduled.push(ScheduledBeat { time, beat, accent });

            self.next_beat = beat % self.clock.time_signature.numerator() + 1;
            self.next_beat_time += interval;
        }

        if !scheduled.is_empty() {
            log::trace!("Scheduled {} beat(s) up to {:.3}s", scheduled.len(), self.next_beat_time);
        }
        scheduled
    }
}

/// The background thread that keeps polling while the metronome runs.
struct Poller {
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

pub struct BeatScheduler {
    synth: ToneSynthesizer,
    config: MetronomeConfig,
    core: Arc<Mutex<SchedulerCore>>,
    poller: Option<Poller>,
}

impl fmt::Debug for BeatScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeatScheduler")
            .field("clock", &self.beat_clock())
            .finish_non_exhaustive()
    }
}

impl BeatScheduler {
    pub fn new(config: MetronomeConfig, synth: ToneSynthesizer) -> Result<Self> {
        config.validate()?;
        let time_signature = TimeSignature::try_from(config.time_signature)?;
        let clock = BeatClock {
            bpm: effective_bpm(&config, config.bpm)?,
            time_signature,
            current_beat_index: 1,
            accent_enabled: config.accent_enabled,
            volume: config.volume.clamp(0.0, 1.0),
            running: false,
        };
        let core = SchedulerCore {
            clock,
            next_beat: 1,
            next_beat_time: 0.0,
            history: VecDeque::with_capacity(config.history_len),
            history_len: config.history_len,
        };
        Ok(Self {
            synth,
            config,
            core: Arc::new(Mutex::new(core)),
            poller: None,
        })
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerCore> {
        lock_core(&self.core)
    }

    pub fn is_running(&self) -> bool {
        self.lock().clock.running
    }

    /// Resumes the audio context and starts clicking from beat 1 at the
    /// current context time. Starting a running metronome does nothing.
    ///
    /// # Errors
    /// The context's error when it cannot resume; the metronome stays stopped.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        // A poller that stopped on its own is still waiting to be joined.
        self.join_poller();
        self.synth.context().resume()?;

        let now = self.synth.now();
        {
            let mut core = self.lock();
            core.reset_measure();
            core.next_beat_time = now;
            core.history.clear();
            core.clock.running = true;
        }
        self.poll();

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let ticker = crossbeam_channel::tick(self.config.poll_interval());
        let lookahead = self.config.lookahead().as_secs_f64();
        let core = self.core.clone();
        let synth = self.synth.clone();

        let spawned = thread::Builder::new()
            .name("metronome-poller".into())
            .spawn(move || {
                loop {
                    crossbeam_channel::select! {
                        recv(ticker) -> _ => {
                            let now = synth.now();
                            let mut guard = lock_core(&core);
                            guard.schedule_ahead(now, lookahead, &synth);
                            if !guard.clock.running {
                                break;
                            }
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                log::debug!("Metronome poller exited");
            });

        match spawned {
            Ok(thread) => {
                self.poller = Some(Poller {
                    shutdown_tx,
                    thread: Some(thread),
                });
                let clock = self.beat_clock();
                log::info!("Metronome started at {} BPM in {}", clock.bpm, clock.time_signature);
                Ok(())
            }
            Err(e) => {
                self.lock().clock.running = false;
                Err(e.into())
            }
        }
    }

    /// Stops polling and resets to beat 1. Clicks already inside the
    /// lookahead window still sound.
    pub fn stop(&mut self) {
        self.join_poller();
        let mut core = self.lock();
        if core.clock.running {
            log::info!("Metronome stopped");
        }
        core.clock.running = false;
        core.reset_measure();
    }

    fn join_poller(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            let _ = poller.shutdown_tx.send(());
            if let Some(thread) = poller.thread.take() {
                if thread.join().is_err() {
                    log::error!("Metronome poller panicked");
                }
            }
        }
    }

    /// Starts or stops the metronome. Returns whether it is now running.
    pub fn toggle(&mut self) -> Result<bool> {
        if self.is_running() {
            self.stop();
        } else {
            self.start()?;
        }
        Ok(self.is_running())
    }

    /// Runs one scheduling pass against the current context time and returns
    /// the beats it scheduled. The poller thread calls this on every tick.
    pub fn poll(&self) -> Vec<ScheduledBeat> {
        let now = self.synth.now();
        let lookahead = self.config.lookahead().as_secs_f64();
        self.lock().schedule_ahead(now, lookahead, &self.synth)
    }

    /// Sets the tempo from the next beat on and returns the tempo actually
    /// used. Out-of-range values are clamped into the configured range, or
    /// rejected when `strict_bpm` is set.
    pub fn set_bpm(&self, bpm: f64) -> Result<f64> {
        let bpm = effective_bpm(&self.config, bpm)?;
        let mut core = self.lock();
        core.clock.bpm = bpm;
        core.history.clear();
        log::debug!("Tempo set to {bpm} BPM");
        Ok(bpm)
    }

    /// Changes the measure length and restarts counting at beat 1.
    pub fn set_time_signature(&self, time_signature: TimeSignature) {
        let mut core = self.lock();
        core.clock.time_signature = time_signature;
        core.reset_measure();
        log::debug!("Time signature set to {time_signature}");
    }

    /// Sets the click volume, clamped to [0, 1]. Returns the value used.
    pub fn set_volume(&self, volume: f32) -> Result<f32> {
        if volume.is_nan() {
            return Err(Error::invalid("volume", "must be a number"));
        }
        let volume = volume.clamp(0.0, 1.0);
        self.lock().clock.volume = volume;
        Ok(volume)
    }

    pub fn set_accent_enabled(&self, enabled: bool) {
        self.lock().clock.accent_enabled = enabled;
    }

    pub fn current_beat_index(&self) -> u32 {
        self.lock().clock.current_beat_index
    }

    pub fn beat_clock(&self) -> BeatClock {
        self.lock().clock
    }

    /// Fit of the recently scheduled beat times, since the last start, tempo
    /// change or re-anchor.
    pub fn timing_report(&self) -> Option<TimingReport> {
        let times: Vec<f64> = self.lock().history.iter().copied().collect();
        TimingReport::from_beat_times(&times)
    }
}

impl Drop for BeatScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock_core(core: &Mutex<SchedulerCore>) -> MutexGuard<'_, SchedulerCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

fn effective_bpm(config: &MetronomeConfig, bpm: f64) -> Result<f64> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(Error::invalid("bpm", format!("must be a positive number, got {bpm}")));
    }
    let (min, max) = (config.min_bpm, config.max_bpm);
    if (min..=max).contains(&bpm) {
        return Ok(bpm);
    }
    if config.strict_bpm {
        return Err(Error::invalid("bpm", format!("{bpm} is outside {min}..={max}")));
    }
    let clamped = bpm.clamp(min, max);
    log::debug!("Tempo {bpm} clamped to {clamped}");
    Ok(clamped)
}
