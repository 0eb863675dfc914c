use std::time::Duration;

/// Session-level tuning shared by the manager, decode pipe and playback controller.
#[derive(Clone, Debug)]
pub struct PlaybackConfig {
    /// Bytes that must be appended before a start attempt is made.
    pub start_threshold_bytes: u64,
    /// Delay between a failed start attempt and its retry.
    pub start_retry_delay: Duration,
    /// Retries after the first failed start; `None` keeps retrying.
    pub max_start_retries: Option<u32>,
    /// Tear down sessions that stop receiving chunks before their final one.
    pub idle_timeout: Option<Duration>,
    /// How many finished or superseded identities are remembered for rejection.
    pub retired_history: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            start_threshold_bytes: 32 * 1024,
            start_retry_delay: Duration::from_millis(200),
            max_start_retries: Some(5),
            idle_timeout: Some(Duration::from_secs(60)),
            retired_history: 32,
        }
    }
}

/// Tuning for the cpal/symphonia backend.
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// Output device substring match; `None` selects the host default.
    pub device: Option<String>,
    /// Unread bytes the spool accepts before reporting quota exhaustion.
    pub spool_capacity_bytes: usize,
    /// Target buffer duration for the decoded and resampled queues.
    pub buffer_seconds: f32,
    /// Decoded audio (ms) that counts as "enough data" for a start attempt.
    pub ready_buffer_ms: u64,
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            spool_capacity_bytes: 1024 * 1024,
            buffer_seconds: 2.0,
            ready_buffer_ms: 300,
            chunk_frames: 1024,
            refill_max_frames: 4096,
        }
    }
}
