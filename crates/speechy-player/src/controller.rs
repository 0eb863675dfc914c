//! Decides when the sink starts playing and retries transient start failures.

use std::sync::Arc;

use tokio::time::Duration;

use crate::config::PlaybackConfig;
use crate::session::PlaybackSession;

#[derive(Clone, Copy, Debug)]
pub(crate) struct PlaybackController {
    threshold_bytes: u64,
    retry_delay: Duration,
    max_retries: Option<u32>,
}

impl PlaybackController {
    pub(crate) fn new(config: &PlaybackConfig) -> Self {
        Self {
            threshold_bytes: config.start_threshold_bytes,
            retry_delay: config.start_retry_delay,
            max_retries: config.max_start_retries,
        }
    }

    /// Start the sink if enough has been appended and nothing is started or pending.
    ///
    /// Failures are logged and retried in the background; they never reach the caller.
    pub(crate) async fn maybe_start(&self, session: &Arc<PlaybackSession>) {
        self.try_start(session, false).await;
    }

    /// Start the sink regardless of the byte threshold.
    ///
    /// A decode buffer that rejects appends for lack of space holds all the data the sink
    /// needs, and nothing frees that space until playback consumes it.
    pub(crate) async fn start_on_backpressure(&self, session: &Arc<PlaybackSession>) {
        self.try_start(session, true).await;
    }

    /// Interval at which a drain blocked on a full buffer re-checks the sink.
    pub(crate) fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    async fn try_start(&self, session: &Arc<PlaybackSession>, force: bool) {
        if !self.claim(session, force) {
            return;
        }
        match session.sink().play().await {
            Ok(()) => self.mark_started(session),
            Err(e) => {
                if session.is_torn_down() {
                    return;
                }
                tracing::warn!(identity = %session.identity(), error = %e, "playback start failed");
                self.schedule_retry(session);
            }
        }
    }

    fn claim(&self, session: &PlaybackSession, force: bool) -> bool {
        if session.is_torn_down() {
            return false;
        }
        let mut st = session.state();
        if st.has_started_playing || st.start_pending {
            return false;
        }
        if !session.sink().is_paused() {
            st.has_started_playing = true;
            tracing::debug!(identity = %session.identity(), "sink already playing");
            return false;
        }
        let complete = st.end_of_stream_signaled && st.total_bytes_appended > 0;
        let ready = force
            || st.total_bytes_appended >= self.threshold_bytes
            || complete
            || session.sink().has_enough_data();
        if ready {
            st.start_pending = true;
        }
        ready
    }

    fn mark_started(&self, session: &PlaybackSession) {
        let mut st = session.state();
        st.has_started_playing = true;
        st.start_pending = false;
        st.retry_task = None;
        tracing::info!(
            identity = %session.identity(),
            bytes = st.total_bytes_appended,
            "playback started"
        );
    }

    fn give_up(&self, session: &PlaybackSession) {
        let mut st = session.state();
        st.start_pending = false;
        st.retry_task = None;
        tracing::warn!(
            identity = %session.identity(),
            "playback start retries exhausted; waiting for more data"
        );
    }

    fn schedule_retry(&self, session: &Arc<PlaybackSession>) {
        if self.max_retries == Some(0) {
            self.give_up(session);
            return;
        }
        let controller = *self;
        let task_session = session.clone();
        let task = tokio::spawn(async move { controller.retry_loop(task_session).await });
        session.state().retry_task = Some(task);
    }

    async fn retry_loop(self, session: Arc<PlaybackSession>) {
        let mut retries = 0u32;
        loop {
            tokio::time::sleep(self.retry_delay).await;
            if session.is_torn_down() {
                return;
            }
            retries += 1;
            match session.sink().play().await {
                Ok(()) => {
                    self.mark_started(&session);
                    return;
                }
                Err(e) => {
                    if session.is_torn_down() {
                        return;
                    }
                    if self.max_retries.is_some_and(|max| retries >= max) {
                        self.give_up(&session);
                        return;
                    }
                    tracing::debug!(identity = %session.identity(), retries, error = %e, "playback start retry failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MediaHost;
    use crate::mock_host::{Event, MockHost};

    fn controller(threshold: u64, max_retries: Option<u32>) -> PlaybackController {
        PlaybackController::new(&PlaybackConfig {
            start_threshold_bytes: threshold,
            start_retry_delay: Duration::from_millis(200),
            max_start_retries: max_retries,
            ..PlaybackConfig::default()
        })
    }

    async fn session(host: &MockHost, appended: u64) -> Arc<PlaybackSession> {
        let opened = host.open_session().await.unwrap();
        let session = Arc::new(PlaybackSession::new("OpenAI-alloy-1".into(), opened));
        session.state().total_bytes_appended = appended;
        session
    }

    fn plays(host: &MockHost) -> usize {
        host.count(|e| matches!(e, Event::Play(_)))
    }

    fn failed_plays(host: &MockHost) -> usize {
        host.count(|e| matches!(e, Event::PlayFailed(_)))
    }

    #[tokio::test]
    async fn below_threshold_does_not_attempt() {
        let host = MockHost::new();
        let session = session(&host, 1024).await;
        controller(4096, Some(3)).maybe_start(&session).await;
        assert_eq!(plays(&host) + failed_plays(&host), 0);
        assert!(!session.state().start_pending);
    }

    #[tokio::test]
    async fn threshold_reached_starts_exactly_once() {
        let host = MockHost::new();
        let session = session(&host, 4096).await;
        let ctl = controller(4096, Some(3));
        ctl.maybe_start(&session).await;
        ctl.maybe_start(&session).await;
        assert_eq!(plays(&host), 1);
        assert!(session.state().has_started_playing);
    }

    #[tokio::test]
    async fn sink_readiness_overrides_threshold() {
        let host = MockHost::new();
        host.set_enough_data(true);
        let session = session(&host, 10).await;
        controller(1 << 20, Some(3)).maybe_start(&session).await;
        assert_eq!(plays(&host), 1);
    }

    #[tokio::test]
    async fn completed_short_stream_starts_below_threshold() {
        let host = MockHost::new();
        let session = session(&host, 10).await;
        session.state().end_of_stream_signaled = true;
        controller(1 << 20, Some(3)).maybe_start(&session).await;
        assert_eq!(plays(&host), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_after_fixed_delay() {
        let host = MockHost::new();
        host.fail_next_plays(2);
        let session = session(&host, 4096).await;
        let ctl = controller(4096, Some(5));

        ctl.maybe_start(&session).await;
        assert_eq!(failed_plays(&host), 1);
        assert!(session.state().start_pending);

        // pending retry blocks a second concurrent attempt
        ctl.maybe_start(&session).await;
        assert_eq!(failed_plays(&host), 1);

        tokio::time::sleep(Duration::from_millis(450)).await;
        assert_eq!(failed_plays(&host), 2);
        assert_eq!(plays(&host), 1);
        assert!(session.state().has_started_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded_and_session_survives() {
        let host = MockHost::new();
        host.fail_next_plays(100);
        let session = session(&host, 4096).await;
        let ctl = controller(4096, Some(2));

        ctl.maybe_start(&session).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(failed_plays(&host), 3);
        assert!(!session.state().has_started_playing);
        assert!(!session.state().start_pending);
        assert!(!session.is_torn_down());

        // new data gets a fresh budget
        host.fail_next_plays(0);
        ctl.maybe_start(&session).await;
        assert_eq!(plays(&host), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_retries_continue_until_success() {
        let host = MockHost::new();
        host.fail_next_plays(20);
        let session = session(&host, 4096).await;
        controller(4096, None).maybe_start(&session).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(failed_plays(&host), 20);
        assert_eq!(plays(&host), 1);
    }

    #[tokio::test]
    async fn backpressure_starts_below_threshold() {
        let host = MockHost::new();
        let session = session(&host, 0).await;
        let ctl = controller(1 << 20, Some(3));
        ctl.maybe_start(&session).await;
        assert_eq!(plays(&host), 0);
        ctl.start_on_backpressure(&session).await;
        assert_eq!(plays(&host), 1);
        assert!(session.state().has_started_playing);
    }

    #[tokio::test]
    async fn sink_already_playing_is_not_started_again() {
        let host = MockHost::new();
        let session = session(&host, 4096).await;
        session.sink().play().await.unwrap();
        controller(4096, Some(3)).maybe_start(&session).await;
        assert_eq!(plays(&host), 1);
        assert!(session.state().has_started_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_cancels_pending_retry() {
        let host = MockHost::new();
        host.fail_next_plays(1);
        let session = session(&host, 4096).await;
        controller(4096, Some(5)).maybe_start(&session).await;
        session.teardown();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(plays(&host), 0);
        assert_eq!(failed_plays(&host), 1);
    }
}
