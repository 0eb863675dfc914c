//! Seams between the session logic and the platform that decodes and plays audio.
//!
//! The session layer only talks to these traits. The cpal/symphonia implementation lives in
//! [`crate::backend`]; tests drive the same code with a scripted in-memory host.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::format::ContainerFormat;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The operation may succeed later (e.g. the sink has nothing decoded yet).
    #[error("not ready: {0}")]
    NotReady(String),
    /// The object was already closed or released.
    #[error("closed")]
    Closed,
    #[error("{0}")]
    Failed(String),
}

/// Rejections from [`AppendBuffer::append`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppendError {
    /// No room for the chunk until buffered data is consumed.
    #[error("buffer quota exceeded")]
    QuotaExceeded,
    /// The chunk (or the stream so far) could not be decoded.
    #[error("{0}")]
    Decode(String),
    #[error("buffer closed")]
    Closed,
}

/// A freshly opened pair of decode session and audio sink.
pub struct OpenedSession {
    pub decode: Arc<dyn DecodeSession>,
    pub sink: Arc<dyn AudioSink>,
}

/// Factory for playback sessions.
#[async_trait]
pub trait MediaHost: Send + Sync {
    /// Whether a decode buffer for `format` can be created.
    fn supports(&self, format: ContainerFormat) -> bool;
    /// Build a sink attached to a new decode session; resolves once the session is open.
    async fn open_session(&self) -> Result<OpenedSession, HostError>;
}

/// Byte-stream decoder bound to one sink.
pub trait DecodeSession: Send + Sync {
    /// Create the single append buffer for this session.
    fn add_buffer(&self, format: ContainerFormat) -> Result<Arc<dyn AppendBuffer>, HostError>;
    /// Signal that no more bytes will be appended.
    fn end_of_stream(&self) -> Result<(), HostError>;
    /// Open means bytes may still be appended and end-of-stream has not been signaled.
    fn is_open(&self) -> bool;
    /// Drop all decoder resources.
    fn close(&self);
}

/// Accepts encoded bytes, one append in flight at a time.
///
/// Completion signals ("update end") are counted. A waiter reads
/// [`update_end_count`](AppendBuffer::update_end_count) before checking its condition and then
/// waits with [`update_end`](AppendBuffer::update_end), so a signal raised in between is never
/// lost and every waiter observes it.
#[async_trait]
pub trait AppendBuffer: Send + Sync {
    /// An append has been submitted and has not completed yet.
    fn is_updating(&self) -> bool;
    /// Submit a chunk. Must not be called while [`is_updating`](AppendBuffer::is_updating).
    fn append(&self, chunk: &[u8]) -> Result<(), AppendError>;
    /// Number of completion signals raised so far.
    fn update_end_count(&self) -> u64;
    /// Resolve once more than `seen` completion signals have been raised.
    async fn update_end(&self, seen: u64);
}

/// Output element that plays what the decode session produces.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Start (or resume) playback. May fail transiently while too little is decoded.
    async fn play(&self) -> Result<(), HostError>;
    fn pause(&self);
    fn is_paused(&self) -> bool;
    /// The sink has buffered enough decoded audio to start without stalling.
    fn has_enough_data(&self) -> bool;
    /// Everything decoded so far has been played and the stream has ended.
    fn has_ended(&self) -> bool {
        false
    }
    /// Release the output resources.
    fn release(&self);
}
