//! Decoder thread: spool bytes in, interleaved `f32` samples out.
//!
//! The stream spec is unknown until the container has been probed, so the decoded queue is
//! published through [`DecodedStream`] once probing succeeds. Failures are recorded on the spool
//! and reported by the next append.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;

use anyhow::{Context, Result, anyhow};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::pcm::{PcmQueue, capacity_for};
use super::spool::Spool;
use crate::format::ContainerFormat;

/// Handoff point between the decoder thread and the output thread.
pub(crate) struct DecodedStream {
    published: OnceLock<(SignalSpec, Arc<PcmQueue>)>,
    closed: AtomicBool,
}

impl DecodedStream {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            published: OnceLock::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn get(&self) -> Option<&(SignalSpec, Arc<PcmQueue>)> {
        self.published.get()
    }

    fn publish(&self, spec: SignalSpec, queue: Arc<PcmQueue>) {
        if self.published.set((spec, queue)).is_err() {
            return;
        }
        if self.closed.load(Ordering::SeqCst) {
            self.close();
        }
    }

    /// Close the decoded queue so every stage unblocks.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some((_, queue)) = self.published.get() {
            queue.close();
        }
    }

    /// Decoded audio buffered ahead of the output, in milliseconds.
    pub(crate) fn buffered_ms(&self) -> u64 {
        self.get()
            .map(|(spec, queue)| queue.buffered_ms(spec.rate))
            .unwrap_or(0)
    }
}

/// Start decoding `format` from `spool` on a background thread.
pub(crate) fn spawn_decoder(
    spool: Arc<Spool>,
    format: ContainerFormat,
    buffer_seconds: f32,
    stream: Arc<DecodedStream>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("speechy-decode".into())
        .spawn(move || {
            if let Err(e) = run_decoder(&spool, format, buffer_seconds, &stream) {
                if spool.is_closed() {
                    tracing::debug!("decoder stopped after close: {e:#}");
                } else {
                    tracing::warn!(container = %format, "decoder failed: {e:#}");
                    spool.fail(format!("{e:#}"));
                }
            }
            stream.close();
        })
}

fn run_decoder(
    spool: &Arc<Spool>,
    format: ContainerFormat,
    buffer_seconds: f32,
    stream: &DecodedStream,
) -> Result<()> {
    let mss = MediaSourceStream::new(Box::new(spool.reader()), Default::default());
    let mut hint = Hint::new();
    hint.with_extension(format.extension());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("probe {format} stream"))?;
    let mut reader = probed.format;

    let track = reader
        .default_track()
        .ok_or_else(|| anyhow!("no default audio track"))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| anyhow!("unknown channel layout"))?;
    let rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate"))?;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .context("create decoder")?;

    let queue = Arc::new(PcmQueue::new(
        channels.count(),
        capacity_for(rate, channels.count(), buffer_seconds),
    ));
    stream.publish(SignalSpec::new(rate, channels), queue.clone());
    tracing::info!(
        container = %format,
        rate_hz = rate,
        channels = channels.count(),
        "decoder ready"
    );

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e).context("read packet"),
        };

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("skipping undecodable frame: {e}");
                continue;
            }
            Err(e) => return Err(e).context("decode packet"),
        };

        let mut samples = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        samples.copy_interleaved_ref(decoded);
        if !queue.push(samples.samples()) {
            break;
        }
    }

    queue.close();
    tracing::debug!(container = %format, "decoder reached end of stream");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn wav_bytes(rate: u32, samples: &[i16]) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    fn wait_for_spec(stream: &DecodedStream) -> (SignalSpec, Arc<PcmQueue>) {
        for _ in 0..200 {
            if let Some((spec, queue)) = stream.get() {
                return (*spec, queue.clone());
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("decoder never published a stream");
    }

    #[test]
    fn decodes_wav_streamed_in_pieces() {
        let spool = Spool::new(1 << 20);
        let stream = DecodedStream::new();
        let bytes = wav_bytes(24_000, &vec![1000i16; 2400]);
        let handle = spawn_decoder(spool.clone(), ContainerFormat::Wav, 2.0, stream.clone()).unwrap();

        // header arrives on its own, as the Google producer sends it
        spool.push(&bytes[..44]).unwrap();
        for piece in bytes[44..].chunks(1000) {
            spool.push(piece).unwrap();
        }
        spool.finish();
        handle.join().unwrap();

        let (spec, queue) = wait_for_spec(&stream);
        assert_eq!(spec.rate, 24_000);
        assert_eq!(spec.channels.count(), 1);
        assert_eq!(queue.buffered_frames(), 2400);
        assert!(queue.is_closed());
        assert!(spool.failure().is_none());
    }

    #[test]
    fn garbage_records_failure_on_spool() {
        let spool = Spool::new(1 << 20);
        let stream = DecodedStream::new();
        let handle = spawn_decoder(spool.clone(), ContainerFormat::Wav, 2.0, stream.clone()).unwrap();
        spool.push(&[0x42; 256]).unwrap();
        spool.finish();
        handle.join().unwrap();

        assert!(stream.get().is_none());
        assert!(spool.failure().is_some());
        assert!(matches!(spool.push(b"more"), Err(crate::host::AppendError::Decode(_))));
    }

    #[test]
    fn close_stops_decoder_quietly() {
        let spool = Spool::new(1 << 20);
        let stream = DecodedStream::new();
        let handle = spawn_decoder(spool.clone(), ContainerFormat::Mpeg, 2.0, stream.clone()).unwrap();
        spool.close();
        handle.join().unwrap();
        assert!(spool.failure().is_none());
    }
}
