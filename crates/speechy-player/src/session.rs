//! One playback identity bound to a sink and a decode session.

use std::sync::{Arc, Mutex, MutexGuard};

use speechy_types::{SessionPhase, SessionSnapshot};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::chunk_queue::ChunkQueue;
use crate::error::{PlayerError, Result};
use crate::format::{self, ContainerFormat};
use crate::host::{AppendBuffer, AudioSink, DecodeSession, OpenedSession};

/// Mutable per-session state. Guarded by a std mutex that is never held across an await.
pub(crate) struct SessionState {
    pub(crate) queue: ChunkQueue,
    pub(crate) buffer: Option<Arc<dyn AppendBuffer>>,
    pub(crate) format: Option<ContainerFormat>,
    pub(crate) total_bytes_appended: u64,
    pub(crate) has_started_playing: bool,
    /// A start attempt or its retry task is outstanding.
    pub(crate) start_pending: bool,
    /// A drain loop currently owns the queue.
    pub(crate) is_processing: bool,
    /// End-of-stream handling has been claimed by one drain.
    pub(crate) finalizing: bool,
    pub(crate) end_of_stream_signaled: bool,
    pub(crate) last_activity: Instant,
    pub(crate) retry_task: Option<JoinHandle<()>>,
}

pub(crate) struct PlaybackSession {
    identity: String,
    format_hint: Option<ContainerFormat>,
    decode: Arc<dyn DecodeSession>,
    sink: Arc<dyn AudioSink>,
    state: Mutex<SessionState>,
    cancel: watch::Sender<bool>,
}

impl PlaybackSession {
    pub(crate) fn new(identity: String, opened: OpenedSession) -> Self {
        let format_hint = format::provider_hint(&identity);
        let (cancel, _) = watch::channel(false);
        Self {
            identity,
            format_hint,
            decode: opened.decode,
            sink: opened.sink,
            state: Mutex::new(SessionState {
                queue: ChunkQueue::new(),
                buffer: None,
                format: None,
                total_bytes_appended: 0,
                has_started_playing: false,
                start_pending: false,
                is_processing: false,
                finalizing: false,
                end_of_stream_signaled: false,
                last_activity: Instant::now(),
                retry_task: None,
            }),
            cancel,
        }
    }

    pub(crate) fn identity(&self) -> &str {
        &self.identity
    }

    pub(crate) fn format_hint(&self) -> Option<ContainerFormat> {
        self.format_hint
    }

    pub(crate) fn decode(&self) -> &Arc<dyn DecodeSession> {
        &self.decode
    }

    pub(crate) fn sink(&self) -> &Arc<dyn AudioSink> {
        &self.sink
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        *self.cancel.borrow()
    }

    /// `Err(Inactive)` once the session has been torn down.
    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_torn_down() {
            Err(PlayerError::Inactive(self.identity.clone()))
        } else {
            Ok(())
        }
    }

    /// Resolves when the session is torn down.
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        let _ = rx.wait_for(|torn_down| *torn_down).await;
    }

    /// Whether the final chunk is still outstanding and nothing arrived for `timeout`.
    pub(crate) fn is_idle(&self, timeout: Duration) -> bool {
        let st = self.state();
        !st.queue.end_of_stream() && st.last_activity.elapsed() >= timeout
    }

    /// Whether the sink finished playing a completed stream.
    pub(crate) fn has_finished(&self) -> bool {
        self.state().end_of_stream_signaled && self.sink.has_ended()
    }

    /// Pause and release the sink, end an open decode session and drop all queued data.
    ///
    /// Idempotent; only the first call does anything.
    pub(crate) fn teardown(&self) {
        if self.cancel.send_replace(true) {
            return;
        }

        let (buffer, retry, eos_signaled) = {
            let mut st = self.state();
            st.queue.clear();
            st.total_bytes_appended = 0;
            st.has_started_playing = false;
            st.start_pending = false;
            (st.buffer.take(), st.retry_task.take(), st.end_of_stream_signaled)
        };

        if let Some(task) = retry {
            task.abort();
        }

        self.sink.pause();
        self.sink.release();

        if self.decode.is_open() && !eos_signaled {
            let busy = buffer.as_ref().is_some_and(|b| b.is_updating());
            if busy {
                tracing::debug!(identity = %self.identity, "append in flight; closing without end-of-stream");
            } else if let Err(e) = self.decode.end_of_stream() {
                tracing::warn!(identity = %self.identity, error = %e, "end-of-stream during teardown failed");
            }
        }
        self.decode.close();
        tracing::info!(identity = %self.identity, "playback session torn down");
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let st = self.state();
        let phase = if st.end_of_stream_signaled {
            SessionPhase::Completed
        } else if st.queue.end_of_stream() {
            SessionPhase::Draining
        } else {
            SessionPhase::Active
        };
        SessionSnapshot {
            phase,
            identity: Some(self.identity.clone()),
            container: st.format.map(|f| f.to_string()),
            queued_chunks: st.queue.len(),
            total_bytes_appended: st.total_bytes_appended,
            has_started_playing: st.has_started_playing,
            end_of_stream_signaled: st.end_of_stream_signaled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MediaHost;
    use crate::mock_host::{Event, MockHost};

    async fn open(host: &MockHost, identity: &str) -> PlaybackSession {
        let opened = host.open_session().await.unwrap();
        PlaybackSession::new(identity.to_string(), opened)
    }

    #[tokio::test]
    async fn hint_comes_from_identity() {
        let host = MockHost::new();
        let session = open(&host, "Google-en-US-Neural2-C-1").await;
        assert_eq!(session.format_hint(), Some(ContainerFormat::Wav));
    }

    #[tokio::test]
    async fn teardown_releases_and_ends_open_session_once() {
        let host = MockHost::new();
        let session = open(&host, "OpenAI-alloy-1").await;
        session.state().queue.enqueue(vec![1, 2, 3], false);

        session.teardown();
        session.teardown();

        assert!(session.is_torn_down());
        assert!(session.state().queue.is_empty());
        assert_eq!(
            host.events(),
            vec![
                Event::SessionOpened(0),
                Event::Pause(0),
                Event::SinkReleased(0),
                Event::EndOfStream(0),
                Event::SessionClosed(0),
            ]
        );
        assert!(matches!(session.ensure_live(), Err(PlayerError::Inactive(_))));
    }

    #[tokio::test]
    async fn cancelled_resolves_after_teardown() {
        let host = MockHost::new();
        let session = Arc::new(open(&host, "OpenAI-alloy-1").await);
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.cancelled().await })
        };
        session.teardown();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_tracks_phase() {
        let host = MockHost::new();
        let session = open(&host, "OpenAI-alloy-1").await;
        assert_eq!(session.snapshot().phase, SessionPhase::Active);
        session.state().queue.enqueue(vec![1], true);
        assert_eq!(session.snapshot().phase, SessionPhase::Draining);
        session.state().end_of_stream_signaled = true;
        let snap = session.snapshot();
        assert_eq!(snap.phase, SessionPhase::Completed);
        assert_eq!(snap.identity.as_deref(), Some("OpenAI-alloy-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_only_before_final_chunk() {
        let host = MockHost::new();
        let session = open(&host, "OpenAI-alloy-1").await;
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(session.is_idle(Duration::from_secs(5)));
        assert!(!session.is_idle(Duration::from_secs(6)));
        session.state().queue.enqueue(Vec::new(), true);
        assert!(!session.is_idle(Duration::from_secs(5)));
    }
}
