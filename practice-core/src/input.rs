//! Live input sources for the tuner.
//!
//! Opening an [`InputDevice`] is the microphone permission request: on success
//! it starts pushing mono frames into a channel and hands back a
//! [`CaptureHandle`] that owns the device until released or dropped.

use std::f64::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// A source of mono audio frames.
pub trait InputDevice: Send {
    /// Starts capturing. Roughly `frames_per_second` frames are sent to
    /// `frames` each second until the returned handle is released.
    fn open(&mut self, frames: Sender<Vec<f32>>, frames_per_second: u32) -> anyhow::Result<CaptureHandle>;
}

/// Ownership of an open input device. The device is released on
/// [`CaptureHandle::release`] or on drop, whichever comes first.
#[derive(Debug)]
pub struct CaptureHandle {
    sample_rate: u32,
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Wraps a capture thread that exits once `shutdown_tx` fires (or is
    /// dropped).
    pub fn new(sample_rate: u32, shutdown_tx: Sender<()>, thread: JoinHandle<()>) -> Self {
        Self {
            sample_rate,
            shutdown_tx,
            thread: Some(thread),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_active(&self) -> bool {
        self.thread.is_some()
    }

    /// Stops the capture thread and waits for it to let go of the device.
    pub fn release(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.shutdown_tx.send(());
            if thread.join().is_err() {
                log::error!("Capture thread panicked while releasing the input device");
            }
            log::debug!("Input device released");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Generated input: a steady sine (or silence) delivered at a real-time pace.
///
/// Useful wherever there is no microphone, and it reports whether it is
/// currently open so callers can check that the device was released.
#[derive(Debug, Clone)]
pub struct SyntheticInput {
    sample_rate: u32,
    frequency: Option<f32>,
    amplitude: f32,
    frame_interval: Option<Duration>,
    open: Arc<AtomicBool>,
}

impl SyntheticInput {
    pub fn tone(sample_rate: u32, frequency: f32, amplitude: f32) -> Self {
        Self {
            sample_rate,
            frequency: Some(frequency),
            amplitude,
            frame_interval: None,
            open: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn silence(sample_rate: u32) -> Self {
        Self {
            frequency: None,
            ..Self::tone(sample_rate, 1.0, 0.0)
        }
    }

    /// Delivers frames at a fixed interval instead of in real time.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl InputDevice for SyntheticInput {
    fn open(&mut self, frames: Sender<Vec<f32>>, frames_per_second: u32) -> anyhow::Result<CaptureHandle> {
        if self.is_open() {
            anyhow::bail!("Synthetic input is already open");
        }

        let frame_len = (self.sample_rate / frames_per_second.max(1)).max(1) as usize;
        let interval = self
            .frame_interval
            .unwrap_or_else(|| Duration::from_secs_f64(frame_len as f64 / self.sample_rate as f64));
        let (shutdown_tx, shutdown_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);

        let sample_rate = self.sample_rate as f64;
        let frequency = self.frequency;
        let amplitude = self.amplitude;
        let open = self.open.clone();
        open.store(true, Ordering::Release);

        let thread = thread::Builder::new()
            .name("synthetic-input".into())
            .spawn(move || {
                let mut position: u64 = 0;
                loop {
                    crossbeam_channel::select! {
                        recv(shutdown_rx) -> _ => break,
                        default(interval) => {
                            let frame: Vec<f32> = (0..frame_len as u64)
                                .map(|i| match frequency {
                                    Some(f) => {
                                        let t = (position + i) as f64 / sample_rate;
                                        amplitude * (TAU * f as f64 * t).sin() as f32
                                    }
                                    None => 0.0,
                                })
                                .collect();
                            position += frame_len as u64;
                            if let Err(TrySendError::Disconnected(_)) = frames.try_send(frame) {
                                break;
                            }
                        }
                    }
                }
                open.store(false, Ordering::Release);
            });

        match thread {
            Ok(thread) => Ok(CaptureHandle::new(self.sample_rate, shutdown_tx, thread)),
            Err(e) => {
                self.open.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }
}
