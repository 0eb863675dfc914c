//! [`MediaHost`] backed by symphonia decoding and a CPAL output stream.
//!
//! Each session gets three threads: the decoder reading the append spool, an optional
//! resampler, and the output thread that owns the device stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::decode::{DecodedStream, spawn_decoder};
use super::output::{OutputHandle, spawn_output};
use super::spool::{Spool, SpoolBuffer};
use crate::config::OutputConfig;
use crate::format::ContainerFormat;
use crate::host::{AppendBuffer, AudioSink, DecodeSession, HostError, MediaHost, OpenedSession};

pub struct CpalHost {
    config: OutputConfig,
}

impl CpalHost {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MediaHost for CpalHost {
    fn supports(&self, format: ContainerFormat) -> bool {
        // symphonia is built with the mp3 and wav features
        matches!(format, ContainerFormat::Mpeg | ContainerFormat::Wav)
    }

    async fn open_session(&self) -> Result<OpenedSession, HostError> {
        let decoded = DecodedStream::new();
        let output = spawn_output(decoded.clone(), self.config.clone())
            .map_err(|e| HostError::Failed(format!("spawn output thread: {e}")))?;

        let decode = Arc::new(CpalDecodeSession {
            config: self.config.clone(),
            decoded: decoded.clone(),
            spool: Mutex::new(None),
            open: AtomicBool::new(true),
        });
        let sink = Arc::new(CpalSink {
            output,
            decoded,
            ready_buffer_ms: self.config.ready_buffer_ms,
        });
        tracing::debug!(device = ?self.config.device, "output session opened");
        Ok(OpenedSession { decode, sink })
    }
}

struct CpalDecodeSession {
    config: OutputConfig,
    decoded: Arc<DecodedStream>,
    spool: Mutex<Option<Arc<Spool>>>,
    open: AtomicBool,
}

impl CpalDecodeSession {
    fn spool(&self) -> MutexGuard<'_, Option<Arc<Spool>>> {
        self.spool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DecodeSession for CpalDecodeSession {
    fn add_buffer(&self, format: ContainerFormat) -> Result<Arc<dyn AppendBuffer>, HostError> {
        if !self.is_open() {
            return Err(HostError::Closed);
        }
        let mut slot = self.spool();
        if slot.is_some() {
            return Err(HostError::Failed("session already has a buffer".into()));
        }

        let spool = Spool::new(self.config.spool_capacity_bytes);
        spawn_decoder(
            spool.clone(),
            format,
            self.config.buffer_seconds,
            self.decoded.clone(),
        )
        .map_err(|e| HostError::Failed(format!("spawn decoder thread: {e}")))?;
        *slot = Some(spool.clone());
        Ok(Arc::new(SpoolBuffer::new(spool)))
    }

    fn end_of_stream(&self) -> Result<(), HostError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Err(HostError::Closed);
        }
        let spool = self.spool().clone();
        match spool {
            Some(spool) => {
                if let Some(failure) = spool.failure() {
                    return Err(HostError::Failed(failure));
                }
                spool.finish();
            }
            None => self.decoded.close(),
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(spool) = self.spool().take() {
            spool.close();
        }
        self.decoded.close();
    }
}

struct CpalSink {
    output: OutputHandle,
    decoded: Arc<DecodedStream>,
    ready_buffer_ms: u64,
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn play(&self) -> Result<(), HostError> {
        self.output.play().await
    }

    fn pause(&self) {
        self.output.pause();
    }

    fn is_paused(&self) -> bool {
        self.output.is_paused()
    }

    fn has_enough_data(&self) -> bool {
        self.decoded.buffered_ms() >= self.ready_buffer_ms
    }

    fn has_ended(&self) -> bool {
        self.output.has_ended()
    }

    fn release(&self) {
        self.output.release();
        self.decoded.close();
    }
}
