//! # Audio Device Module
//!
//! Sound card access through CPAL: the output backend that renders the audio
//! graph ([`CpalOutput`]) and the microphone ([`CpalInput`]).
//!
//! A `cpal::Stream` cannot leave the thread that built it, so each stream is
//! built, driven and dropped on a dedicated thread that the rest of the
//! engine talks to over channels.
//!
//! ## Features
//! - Default device selection on the default host
//! - F32, I16 and U16 output formats
//! - Mono capture at the sample rate closest to the preferred one, with
//!   multi-channel input down-mixed to its first channel

use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow, bail};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use crate::context::AudioBackend;
use crate::graph::{GraphPort, Renderer};
use crate::input::{CaptureHandle, InputDevice};

enum OutputCommand {
    Play,
    Pause,
    Close,
}

struct OutputWorker {
    commands: Sender<OutputCommand>,
    replies: Receiver<Result<()>>,
    thread: Option<JoinHandle<()>>,
}

/// Renders the audio graph on the default output device.
#[derive(Default)]
pub struct CpalOutput {
    worker: Option<OutputWorker>,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn command(&mut self, command: OutputCommand) -> Result<()> {
        let worker = self
            .worker
            .as_ref()
            .ok_or_else(|| anyhow!("Audio output is not open"))?;
        worker
            .commands
            .send(command)
            .map_err(|_| anyhow!("Audio output thread has exited"))?;
        worker
            .replies
            .recv()
            .map_err(|_| anyhow!("Audio output thread has exited"))?
    }
}

impl AudioBackend for CpalOutput {
    fn open(&mut self, port: GraphPort) -> Result<u32> {
        if self.worker.is_some() {
            bail!("Audio output is already open");
        }

        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        let (replies_tx, replies_rx) = crossbeam_channel::bounded(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let thread = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || run_output(port, commands_rx, replies_tx, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => {
                self.worker = Some(OutputWorker {
                    commands: commands_tx,
                    replies: replies_rx,
                    thread: Some(thread),
                });
                Ok(sample_rate)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(anyhow!("Audio output thread exited during startup"))
            }
        }
    }

    fn play(&mut self) -> Result<()> {
        self.command(OutputCommand::Play)
    }

    fn pause(&mut self) -> Result<()> {
        self.command(OutputCommand::Pause)
    }

    fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            let _ = worker.commands.send(OutputCommand::Close);
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    log::error!("Audio output thread panicked");
                }
            }
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_output(
    port: GraphPort,
    commands: Receiver<OutputCommand>,
    replies: Sender<Result<()>>,
    ready: Sender<Result<u32>>,
) {
    let (stream, sample_rate) = match start_audio_output(port) {
        Ok(started) => started,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(sample_rate));

    for command in commands.iter() {
        let result = match command {
            OutputCommand::Play => stream.play().map_err(anyhow::Error::from),
            OutputCommand::Pause => stream.pause().map_err(anyhow::Error::from),
            OutputCommand::Close => break,
        };
        let _ = replies.send(result);
    }

    if let Err(e) = stream.pause() {
        log::warn!("Error pausing output stream: {e}");
    }
    drop(stream);
    log::debug!("Audio output thread finished");
}

/// Opens the default output device and builds a paused stream that renders
/// the graph behind `port`.
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Paused stream and its sample rate
/// * `Err(e)` - No device, or no usable output format
pub fn start_audio_output(port: GraphPort) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;
    log::info!("Using audio output device: {}", device.name()?);

    let supported = device.default_output_config()?;
    let sample_rate = supported.sample_rate().0;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let renderer = Renderer::new(port, sample_rate);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_output_stream::<f32>(&device, &config, renderer)?,
        cpal::SampleFormat::I16 => build_output_stream::<i16>(&device, &config, renderer)?,
        cpal::SampleFormat::U16 => build_output_stream::<u16>(&device, &config, renderer)?,
        other => bail!("Unsupported output sample format: {other:?}"),
    };

    // Some hosts start streams on creation.
    if let Err(e) = stream.pause() {
        log::debug!("Output stream cannot be paused before first play: {e}");
    }
    log::info!("Output stream ready: {sample_rate} Hz, {} channel(s)", config.channels);
    Ok((stream, sample_rate))
}

fn build_output_stream<T>(device: &cpal::Device, config: &cpal::StreamConfig, mut renderer: Renderer) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut mix: Vec<f32> = Vec::new();

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            mix.resize(data.len(), 0.0);
            renderer.render(&mut mix, channels);
            for (out, &sample) in data.iter_mut().zip(mix.iter()) {
                *out = T::from_sample(sample);
            }
        },
        |err| log::warn!("An error occurred on the output stream: {err}"),
        None,
    )?;
    Ok(stream)
}

/// The default microphone.
#[derive(Debug, Clone)]
pub struct CpalInput {
    preferred_sample_rate: u32,
}

impl CpalInput {
    pub fn new(preferred_sample_rate: u32) -> Self {
        Self { preferred_sample_rate }
    }
}

impl InputDevice for CpalInput {
    fn open(&mut self, frames: Sender<Vec<f32>>, frames_per_second: u32) -> Result<CaptureHandle> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<u32>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
        let target_rate = self.preferred_sample_rate;

        let thread = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let (stream, sample_rate) = match start_audio_capture(frames, target_rate, frames_per_second) {
                    Ok(started) => started,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(sample_rate));

                // Released on shutdown or when the handle is dropped.
                let _ = shutdown_rx.recv();
                if let Err(e) = stream.pause() {
                    log::warn!("Error pausing input stream: {e}");
                }
                drop(stream);
                log::debug!("Audio capture thread finished");
            })?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => Ok(CaptureHandle::new(sample_rate, shutdown_tx, thread)),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(anyhow!("Audio capture thread exited during startup"))
            }
        }
    }
}

/// Starts audio capture from the default input device.
///
/// Frames of `sample_rate / frames_per_second` mono samples are sent to
/// `sender`; frames are dropped while the receiver is behind.
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Running stream and its sample rate
/// * `Err(e)` - No device, access refused, or no f32 input format
pub fn start_audio_capture(
    sender: Sender<Vec<f32>>,
    target_rate: u32,
    frames_per_second: u32,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;
    log::info!("Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported = find_supported_config(configs, target_rate)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let sample_rate = target_rate.clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
    let config: cpal::StreamConfig = supported.with_sample_rate(cpal::SampleRate(sample_rate)).into();
    let channels = config.channels as usize;
    let frame_len = (sample_rate / frames_per_second.max(1)).max(1) as usize;
    log::info!("Capturing at {sample_rate} Hz, {channels} channel(s), {frame_len} samples per frame");

    let mut audio_buffer = Vec::with_capacity(frame_len * 2);
    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            push_downmixed(&mut audio_buffer, data, channels, frame_len, |frame| {
                let _ = sender.try_send(frame);
            });
        },
        |err| log::warn!("An error occurred on the input stream: {err}"),
        None,
    )?;

    stream.play()?;
    Ok((stream, sample_rate))
}

/// Appends the first channel of interleaved `data` to `buffer` and emits
/// every complete frame of `frame_len` samples.
fn push_downmixed(
    buffer: &mut Vec<f32>,
    data: &[f32],
    channels: usize,
    frame_len: usize,
    mut emit: impl FnMut(Vec<f32>),
) {
    buffer.extend(data.iter().step_by(channels.max(1)));
    while buffer.len() >= frame_len {
        emit(buffer[..frame_len].to_vec());
        buffer.drain(..frame_len);
    }
}

/// Picks the input configuration closest to what the tuner wants: f32
/// samples, preferably mono, with the sample rate nearest to `target_rate`.
///
/// # Returns
/// * `Some(config)` - Best matching configuration
/// * `None` - The device has no f32 input format
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let (min, max) = (c.min_sample_rate().0, c.max_sample_rate().0);
            let rate_distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (c.channels() != 1, rate_distance)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::{SampleFormat, SampleRate, SupportedBufferSize};

    fn range(channels: u16, min: u32, max: u32, format: SampleFormat) -> SupportedStreamConfigRange {
        SupportedStreamConfigRange::new(
            channels,
            SampleRate(min),
            SampleRate(max),
            SupportedBufferSize::Unknown,
            format,
        )
    }

    #[test]
    fn prefers_mono_f32_near_the_target_rate() {
        let configs = vec![
            range(2, 8000, 96000, SampleFormat::F32),
            range(1, 48000, 48000, SampleFormat::F32),
            range(1, 44100, 44100, SampleFormat::I16),
            range(1, 96000, 96000, SampleFormat::F32),
        ];
        let best = find_supported_config(configs, 44100).unwrap();
        assert_eq!(best.channels(), 1);
        assert_eq!(best.min_sample_rate().0, 48000);
    }

    #[test]
    fn falls_back_to_stereo_f32() {
        let configs = vec![range(2, 8000, 96000, SampleFormat::F32), range(1, 44100, 44100, SampleFormat::I16)];
        let best = find_supported_config(configs, 44100).unwrap();
        assert_eq!(best.channels(), 2);
    }

    #[test]
    fn no_f32_format_is_none() {
        assert!(find_supported_config(vec![range(1, 44100, 44100, SampleFormat::I16)], 44100).is_none());
    }

    #[test]
    fn downmix_takes_the_first_channel_and_emits_whole_frames() {
        let mut buffer = Vec::new();
        let mut frames = Vec::new();
        let stereo: Vec<f32> = (0..10).flat_map(|i| [i as f32, -1.0]).collect();

        push_downmixed(&mut buffer, &stereo, 2, 4, |f| frames.push(f));
        assert_eq!(frames, vec![vec![0.0, 1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0, 7.0]]);
        assert_eq!(buffer, [8.0, 9.0]);
    }
}
