//! Moves queued chunks into the session's decode buffer, one append at a time.

use std::sync::Arc;

use tokio::time::Duration;

use crate::controller::PlaybackController;
use crate::error::{PlayerError, Result};
use crate::format::{self, ContainerFormat, MIN_SNIFF_BYTES, Sniff};
use crate::host::{AppendBuffer, AppendError, MediaHost};
use crate::session::{PlaybackSession, SessionState};

enum Step {
    Open(ContainerFormat),
    Append(Arc<dyn AppendBuffer>, Vec<u8>),
    /// Queue drained (or detection deferred); ownership already released.
    Settle(Option<Arc<dyn AppendBuffer>>),
    /// Queue drained after the final chunk; this drain owns end-of-stream.
    Finalize(Option<Arc<dyn AppendBuffer>>),
}

/// Clears `is_processing` on early exit (error or cancelled future).
struct ProcessingClaim<'a> {
    session: &'a PlaybackSession,
    held: bool,
}

impl Drop for ProcessingClaim<'_> {
    fn drop(&mut self) {
        if self.held {
            self.session.state().is_processing = false;
        }
    }
}

pub(crate) struct DecodePipe {
    host: Arc<dyn MediaHost>,
}

impl DecodePipe {
    pub(crate) fn new(host: Arc<dyn MediaHost>) -> Self {
        Self { host }
    }

    /// Create the session's decode buffer for `format`.
    pub(crate) fn open(
        &self,
        session: &PlaybackSession,
        format: ContainerFormat,
    ) -> Result<Arc<dyn AppendBuffer>> {
        if !self.host.supports(format) {
            return Err(PlayerError::UnsupportedFormat(format));
        }
        let buffer = session.decode().add_buffer(format)?;
        tracing::info!(
            identity = %session.identity(),
            container = %format,
            mime = format.mime_type(),
            "decode buffer opened"
        );
        Ok(buffer)
    }

    /// Append every queued chunk in order, then finalize once the final chunk is through.
    ///
    /// Only one drain runs per session; a call that finds another drain active only
    /// nudges the controller and leaves its chunk to that drain.
    pub(crate) async fn drain(
        &self,
        session: &Arc<PlaybackSession>,
        controller: &PlaybackController,
    ) -> Result<()> {
        session.ensure_live()?;
        let claimed = {
            let mut st = session.state();
            !std::mem::replace(&mut st.is_processing, true)
        };
        if !claimed {
            // the owning drain may be parked on a full buffer
            controller.maybe_start(session).await;
            return Ok(());
        }
        let mut claim = ProcessingClaim {
            session: session.as_ref(),
            held: true,
        };

        loop {
            match self.next_step(session, &mut claim) {
                Step::Open(format) => {
                    let buffer = self.open(session, format)?;
                    let mut st = session.state();
                    st.buffer = Some(buffer);
                    st.format = Some(format);
                }
                Step::Append(buffer, chunk) => {
                    self.append(session, &buffer, chunk, controller).await?;
                }
                Step::Settle(buffer) => {
                    if let Some(buffer) = buffer {
                        self.wait_idle(session, &buffer).await?;
                        controller.maybe_start(session).await;
                    }
                    return Ok(());
                }
                Step::Finalize(buffer) => return self.finish(session, buffer, controller).await,
            }
        }
    }

    fn next_step(&self, session: &PlaybackSession, claim: &mut ProcessingClaim<'_>) -> Step {
        let mut st = session.state();
        let Some(buffer) = st.buffer.clone() else {
            if st.queue.is_empty() {
                return release(&mut st, claim, None);
            }
            let sniff = format::detect(&st.queue.prefix(MIN_SNIFF_BYTES));
            if sniff == Sniff::Incomplete && !st.queue.end_of_stream() {
                tracing::debug!(
                    identity = %session.identity(),
                    queued = st.queue.queued_bytes(),
                    "deferring container detection"
                );
                return release(&mut st, claim, None);
            }
            return Step::Open(format::resolve(sniff, session.format_hint()));
        };
        match st.queue.dequeue() {
            Some(chunk) => Step::Append(buffer, chunk),
            None => release(&mut st, claim, Some(buffer)),
        }
    }

    async fn append(
        &self,
        session: &Arc<PlaybackSession>,
        buffer: &Arc<dyn AppendBuffer>,
        chunk: Vec<u8>,
        controller: &PlaybackController,
    ) -> Result<()> {
        loop {
            if buffer.is_updating() {
                self.wait_idle(session, buffer).await?;
                controller.maybe_start(session).await;
            }
            session.ensure_live()?;

            let seen = buffer.update_end_count();
            match buffer.append(&chunk) {
                Ok(()) => {
                    let mut st = session.state();
                    st.total_bytes_appended += chunk.len() as u64;
                    tracing::trace!(
                        identity = %session.identity(),
                        bytes = chunk.len(),
                        total = st.total_bytes_appended,
                        "chunk appended"
                    );
                    return Ok(());
                }
                Err(AppendError::QuotaExceeded) => {
                    tracing::debug!(
                        identity = %session.identity(),
                        bytes = chunk.len(),
                        "decode buffer full; retrying after it drains"
                    );
                    controller.start_on_backpressure(session).await;
                    self.wait_space(session, buffer, seen, controller.retry_delay())
                        .await?;
                }
                Err(AppendError::Decode(detail)) => return Err(PlayerError::Decode(detail)),
                Err(AppendError::Closed) => {
                    return Err(PlayerError::Inactive(session.identity().to_string()));
                }
            }
        }
    }

    async fn finish(
        &self,
        session: &Arc<PlaybackSession>,
        buffer: Option<Arc<dyn AppendBuffer>>,
        controller: &PlaybackController,
    ) -> Result<()> {
        if let Some(buffer) = &buffer {
            self.wait_idle(session, buffer).await?;
            controller.maybe_start(session).await;
        }
        session.ensure_live()?;

        let total = {
            let mut st = session.state();
            if st.end_of_stream_signaled {
                return Ok(());
            }
            st.end_of_stream_signaled = true;
            st.total_bytes_appended
        };
        if session.decode().is_open() {
            session.decode().end_of_stream()?;
        }
        tracing::info!(identity = %session.identity(), bytes = total, "end of stream signaled");

        controller.maybe_start(session).await;
        Ok(())
    }

    async fn wait_signal(
        &self,
        session: &PlaybackSession,
        buffer: &Arc<dyn AppendBuffer>,
        seen: u64,
    ) -> Result<()> {
        tokio::select! {
            _ = buffer.update_end(seen) => session.ensure_live(),
            _ = session.cancelled() => Err(PlayerError::Inactive(session.identity().to_string())),
        }
    }

    /// Like [`Self::wait_signal`], but gives up after `period` so the caller can
    /// re-check the sink while nothing is consuming the buffer.
    async fn wait_space(
        &self,
        session: &PlaybackSession,
        buffer: &Arc<dyn AppendBuffer>,
        seen: u64,
        period: Duration,
    ) -> Result<()> {
        tokio::select! {
            _ = buffer.update_end(seen) => session.ensure_live(),
            _ = session.cancelled() => Err(PlayerError::Inactive(session.identity().to_string())),
            _ = tokio::time::sleep(period) => session.ensure_live(),
        }
    }

    async fn wait_idle(
        &self,
        session: &PlaybackSession,
        buffer: &Arc<dyn AppendBuffer>,
    ) -> Result<()> {
        loop {
            let seen = buffer.update_end_count();
            if !buffer.is_updating() {
                return session.ensure_live();
            }
            self.wait_signal(session, buffer, seen).await?;
        }
    }
}

/// Give up queue ownership under the state lock so a concurrent enqueue either lands
/// before this check or starts its own drain.
fn release(
    st: &mut SessionState,
    claim: &mut ProcessingClaim<'_>,
    buffer: Option<Arc<dyn AppendBuffer>>,
) -> Step {
    st.is_processing = false;
    claim.held = false;
    let complete = st.queue.end_of_stream() && st.queue.is_empty();
    if complete && !st.finalizing {
        st.finalizing = true;
        return Step::Finalize(buffer);
    }
    Step::Settle(buffer)
}
