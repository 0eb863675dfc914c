//! Bounded queue of interleaved `f32` samples between the decode, resample and output stages.
//!
//! Producers block while the queue is full; the output callback only ever uses
//! [`PcmQueue::try_pop`]. Closing wakes every waiter; buffered samples stay readable.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};

/// Queue capacity in samples for `seconds` of audio at `rate_hz`.
///
/// Non-finite or non-positive durations fall back to two seconds.
pub(crate) fn capacity_for(rate_hz: u32, channels: usize, seconds: f32) -> usize {
    let seconds = if seconds.is_finite() && seconds > 0.0 {
        seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * seconds).ceil() as usize;
    frames.saturating_mul(channels)
}

struct PcmState {
    samples: VecDeque<f32>,
    closed: bool,
}

pub(crate) struct PcmQueue {
    channels: usize,
    capacity: usize,
    state: Mutex<PcmState>,
    changed: Condvar,
}

impl PcmQueue {
    pub(crate) fn new(channels: usize, capacity_samples: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            capacity: capacity_samples.max(channels),
            state: Mutex::new(PcmState {
                samples: VecDeque::new(),
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn channels(&self) -> usize {
        self.channels
    }

    fn lock(&self) -> MutexGuard<'_, PcmState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, PcmState>) -> MutexGuard<'a, PcmState> {
        self.changed
            .wait(guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn buffered_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    /// Buffered audio in milliseconds at `rate_hz`.
    pub(crate) fn buffered_ms(&self, rate_hz: u32) -> u64 {
        if rate_hz == 0 {
            return 0;
        }
        self.buffered_frames() as u64 * 1000 / rate_hz as u64
    }

    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Closed and fully consumed.
    pub(crate) fn is_drained(&self) -> bool {
        let st = self.lock();
        st.closed && st.samples.is_empty()
    }

    /// Push samples, blocking while full. Returns `false` if the queue closed first.
    pub(crate) fn push(&self, samples: &[f32]) -> bool {
        let mut rest = samples;
        while !rest.is_empty() {
            let mut st = self.lock();
            while st.samples.len() >= self.capacity && !st.closed {
                st = self.wait(st);
            }
            if st.closed {
                return false;
            }
            let room = self.capacity - st.samples.len();
            let (now, later) = rest.split_at(room.min(rest.len()));
            st.samples.extend(now.iter().copied());
            rest = later;
            drop(st);
            self.changed.notify_all();
        }
        true
    }

    fn take(&self, st: &mut PcmState, frames: usize) -> Vec<f32> {
        let count = (frames * self.channels).min(st.samples.len());
        st.samples.drain(..count).collect()
    }

    /// Block until exactly `frames` are buffered. `None` if the queue closes short.
    pub(crate) fn pop_exact(&self, frames: usize) -> Option<Vec<f32>> {
        let want = frames * self.channels;
        let mut st = self.lock();
        while st.samples.len() < want && !st.closed {
            st = self.wait(st);
        }
        if st.samples.len() < want {
            return None;
        }
        let out = self.take(&mut st, frames);
        drop(st);
        self.changed.notify_all();
        Some(out)
    }

    /// Block until anything is buffered, then take up to `max_frames`.
    /// `None` once the queue is closed and empty.
    pub(crate) fn pop_available(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut st = self.lock();
        while st.samples.is_empty() && !st.closed {
            st = self.wait(st);
        }
        if st.samples.is_empty() {
            return None;
        }
        let out = self.take(&mut st, max_frames);
        drop(st);
        self.changed.notify_all();
        Some(out)
    }

    /// Take up to `max_frames` whole frames without blocking.
    pub(crate) fn try_pop(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut st = self.lock();
        let frames = (st.samples.len() / self.channels).min(max_frames);
        if frames == 0 {
            return None;
        }
        let out = self.take(&mut st, frames);
        drop(st);
        self.changed.notify_all();
        Some(out)
    }
}
