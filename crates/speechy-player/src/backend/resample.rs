//! Sample-rate conversion between the decoded stream and the output device.
//!
//! Speech providers emit 24 kHz audio while most devices run at 44.1/48 kHz, so this stage
//! is the common case rather than the exception.

use std::sync::Arc;
use std::thread;

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};
use symphonia::core::audio::SignalSpec;

use super::pcm::{PcmQueue, capacity_for};

#[derive(Clone, Copy, Debug)]
pub(crate) struct ResampleConfig {
    /// Input frames per resampler call.
    pub(crate) chunk_frames: usize,
    /// Output queue buffering target in seconds.
    pub(crate) buffer_seconds: f32,
}

/// Spawn a resampler thread reading `srcq` at `src_spec.rate` and returning a queue at `dst_rate`.
///
/// The output queue closes once the input is closed and drained.
pub(crate) fn start_resampler(
    srcq: Arc<PcmQueue>,
    src_spec: SignalSpec,
    dst_rate: u32,
    cfg: ResampleConfig,
) -> Result<Arc<PcmQueue>> {
    let channels = src_spec.channels.count();
    let chunk_frames = cfg.chunk_frames.max(1);
    let dstq = Arc::new(PcmQueue::new(
        channels,
        capacity_for(dst_rate, channels, cfg.buffer_seconds),
    ));

    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: calculate_cutoff(128, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };
    let ratio = dst_rate as f64 / src_spec.rate as f64;

    let out = dstq.clone();
    thread::Builder::new()
        .name("speechy-resample".into())
        .spawn(move || {
            let resampler = match Async::<f32>::new_sinc(
                ratio,
                1.1,
                &params,
                chunk_frames,
                channels,
                FixedAsync::Input,
            ) {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("resampler init error: {e}");
                    srcq.close();
                    out.close();
                    return;
                }
            };
            let mut stage = Stage {
                resampler,
                channels,
                output: vec![0.0f32; channels * chunk_frames * 3],
            };
            if let Err(e) = stage.run(&srcq, &out, chunk_frames) {
                tracing::error!("resampler stopped: {e:#}");
                srcq.close();
            }
            out.close();
        })?;

    tracing::info!(from_hz = src_spec.rate, to_hz = dst_rate, "resampling");
    Ok(dstq)
}

struct Stage {
    resampler: Async<f32>,
    channels: usize,
    output: Vec<f32>,
}

impl Stage {
    fn run(&mut self, srcq: &PcmQueue, dstq: &PcmQueue, chunk_frames: usize) -> Result<()> {
        while let Some(block) = srcq.pop_exact(chunk_frames) {
            if !self.process(&block, None, dstq)? {
                return Ok(());
            }
        }
        // closed with less than a full chunk left
        while let Some(tail) = srcq.pop_available(chunk_frames) {
            let frames = tail.len() / self.channels;
            if frames > 0 && !self.process(&tail, Some(frames), dstq)? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Resample one block into `dstq`. Returns `false` once the output queue has closed.
    fn process(&mut self, block: &[f32], partial: Option<usize>, dstq: &PcmQueue) -> Result<bool> {
        let frames = block.len() / self.channels;
        let input = InterleavedSlice::new(block, self.channels, frames)
            .map_err(|e| anyhow!("input adapter: {e}"))?;
        let capacity = self.output.len() / self.channels;
        let mut output = InterleavedSlice::new_mut(&mut self.output, self.channels, capacity)
            .map_err(|e| anyhow!("output adapter: {e}"))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: partial,
        };
        let (_, produced) = self
            .resampler
            .process_into_buffer(&input, &mut output, Some(&indexing))
            .map_err(|e| anyhow!("resample: {e}"))?;

        let samples = produced * self.channels;
        if samples == 0 {
            return Ok(true);
        }
        Ok(dstq.push(&self.output[..samples]))
    }
}
