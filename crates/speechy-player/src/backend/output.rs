//! Output thread owning the CPAL stream.
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream is created, played and dropped
//! on one dedicated thread that takes commands over a channel. Pause is a shared flag read by
//! the audio callback: while set the callback writes silence and leaves the queue untouched.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use tokio::sync::oneshot;

use super::decode::DecodedStream;
use super::device;
use super::pcm::PcmQueue;
use super::resample::{ResampleConfig, start_resampler};
use crate::config::OutputConfig;
use crate::host::HostError;

enum Command {
    Play(oneshot::Sender<Result<(), HostError>>),
    Release,
}

/// Control side of an output thread.
pub(crate) struct OutputHandle {
    commands: Sender<Command>,
    paused: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
}

impl OutputHandle {
    /// Open the output stream on first use, then unpause it.
    pub(crate) async fn play(&self) -> Result<(), HostError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Play(reply))
            .map_err(|_| HostError::Closed)?;
        rx.await.map_err(|_| HostError::Closed)?
    }

    pub(crate) fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// The stream was opened and has played out everything it will ever receive.
    pub(crate) fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Relaxed)
    }

    pub(crate) fn release(&self) {
        self.paused.store(true, Ordering::Relaxed);
        let _ = self.commands.send(Command::Release);
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Spawn the output thread for one session. Nothing touches the device until the first play.
pub(crate) fn spawn_output(
    decoded: Arc<DecodedStream>,
    config: OutputConfig,
) -> io::Result<OutputHandle> {
    let (commands, rx) = crossbeam_channel::unbounded();
    let paused = Arc::new(AtomicBool::new(true));
    let ended = Arc::new(AtomicBool::new(false));
    let (paused_cb, ended_cb) = (paused.clone(), ended.clone());
    thread::Builder::new()
        .name("speechy-output".into())
        .spawn(move || output_thread_main(decoded, config, paused_cb, ended_cb, rx))?;
    Ok(OutputHandle {
        commands,
        paused,
        ended,
    })
}

struct ActiveOutput {
    stream: cpal::Stream,
    queue: Arc<PcmQueue>,
}

fn output_thread_main(
    decoded: Arc<DecodedStream>,
    config: OutputConfig,
    paused: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
    rx: Receiver<Command>,
) {
    let mut active: Option<ActiveOutput> = None;

    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Play(reply) => {
                let result = if active.is_some() {
                    Ok(())
                } else {
                    open_output(&decoded, &config, &paused, &ended).map(|out| {
                        active = Some(out);
                    })
                };
                if result.is_ok() {
                    paused.store(false, Ordering::Relaxed);
                }
                let _ = reply.send(result);
            }
            Command::Release => break,
        }
    }

    if let Some(ActiveOutput { stream, queue }) = active.take() {
        drop(stream);
        queue.close();
    }
    decoded.close();
    tracing::debug!("output thread exiting");
}

fn open_output(
    decoded: &DecodedStream,
    config: &OutputConfig,
    paused: &Arc<AtomicBool>,
    ended: &Arc<AtomicBool>,
) -> Result<ActiveOutput, HostError> {
    let Some((spec, srcq)) = decoded.get() else {
        return Err(HostError::NotReady("stream format not decoded yet".into()));
    };
    if srcq.buffered_frames() == 0 && !srcq.is_closed() {
        return Err(HostError::NotReady("no decoded audio buffered".into()));
    }

    start_stream(*spec, srcq, config, paused, ended)
        .map_err(|e| HostError::Failed(format!("{e:#}")))
}

fn start_stream(
    spec: symphonia::core::audio::SignalSpec,
    srcq: &Arc<PcmQueue>,
    config: &OutputConfig,
    paused: &Arc<AtomicBool>,
    ended: &Arc<AtomicBool>,
) -> Result<ActiveOutput> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, config.device.as_deref())?;
    let supported = device::pick_output_config(&device, Some(spec.rate))?;
    let mut stream_config: cpal::StreamConfig = supported.clone().into();
    if let Some(buf) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buf;
    }

    let dst_rate = stream_config.sample_rate;
    let queue = if dst_rate != spec.rate {
        start_resampler(
            srcq.clone(),
            spec,
            dst_rate,
            ResampleConfig {
                chunk_frames: config.chunk_frames,
                buffer_seconds: config.buffer_seconds,
            },
        )?
    } else {
        srcq.clone()
    };

    let callback = CallbackConfig {
        refill_max_frames: config.refill_max_frames.max(1),
        paused: paused.clone(),
        ended: ended.clone(),
    };
    let stream = build_output_stream(
        &device,
        &stream_config,
        supported.sample_format(),
        &queue,
        callback,
    )?;
    stream.play().context("start output stream")?;

    tracing::info!(
        device = %device.description().map(|d| d.to_string()).unwrap_or_default(),
        rate_hz = dst_rate,
        channels = stream_config.channels,
        format = ?supported.sample_format(),
        buffer_size = ?stream_config.buffer_size,
        "output started"
    );
    Ok(ActiveOutput { stream, queue })
}

struct CallbackConfig {
    refill_max_frames: usize,
    paused: Arc<AtomicBool>,
    ended: Arc<AtomicBool>,
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<PcmQueue>,
    cb: CallbackConfig,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, cb),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, cb),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, cb),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, cb),
        other => Err(anyhow!("unsupported output sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<PcmQueue>,
    cb: CallbackConfig,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels_out = (config.channels as usize).max(1);
    let queue = queue.clone();
    let mut cursor = FrameCursor::new(queue.channels());
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if cb.paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }

            let mut starved = false;
            for frame in data.chunks_mut(channels_out) {
                if !starved && cursor.is_empty() {
                    match queue.try_pop(cb.refill_max_frames) {
                        Some(samples) => cursor.load(samples),
                        None => starved = true,
                    }
                }
                if starved {
                    frame.fill(silence);
                } else {
                    cursor.write_frame(frame);
                }
            }

            if starved && queue.is_drained() {
                cb.ended.store(true, Ordering::Relaxed);
            }
        },
        |err| tracing::warn!("output stream error: {err}"),
        None,
    )?;

    Ok(stream)
}

/// Interleaved samples pulled from the queue, consumed one frame per output frame.
struct FrameCursor {
    channels: usize,
    pos: usize,
    samples: Vec<f32>,
}

impl FrameCursor {
    fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            pos: 0,
            samples: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.samples.len()
    }

    fn load(&mut self, samples: Vec<f32>) {
        self.samples = samples;
        self.pos = 0;
    }

    fn write_frame<T>(&mut self, out: &mut [T])
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let end = (self.pos + self.channels).min(self.samples.len());
        let src = &self.samples[self.pos..end];
        let dst_channels = out.len();
        for (ch, sample) in out.iter_mut().enumerate() {
            *sample = <T as cpal::Sample>::from_sample::<f32>(mapped_sample(src, dst_channels, ch));
        }
        self.pos += self.channels;
    }
}

/// Sample for output channel `dst_ch` from one source frame.
///
/// Stereo folds down to mono by averaging; otherwise missing source channels repeat the last one.
fn mapped_sample(frame: &[f32], dst_channels: usize, dst_ch: usize) -> f32 {
    match (frame.len(), dst_channels) {
        (0, _) => 0.0,
        (2, 1) => 0.5 * (frame[0] + frame[1]),
        (n, _) => frame[dst_ch.min(n - 1)],
    }
}
