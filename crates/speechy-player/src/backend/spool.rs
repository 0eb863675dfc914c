//! Append buffer backed by an in-memory byte spool.
//!
//! Appended bytes are consumed by the decoder thread through [`SpoolReader`], a forward-only
//! symphonia [`MediaSource`]. The spool refuses appends that would push the unread backlog past
//! its capacity; consumption raises a completion signal so the appender can retry.

use std::collections::VecDeque;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use async_trait::async_trait;
use symphonia::core::io::MediaSource;
use tokio::sync::watch;

use crate::host::{AppendBuffer, AppendError};

struct SpoolState {
    pending: VecDeque<u8>,
    consumed: u64,
    finished: bool,
    closed: bool,
    failure: Option<String>,
}

pub(crate) struct Spool {
    capacity: usize,
    state: Mutex<SpoolState>,
    readable: Condvar,
    updates: watch::Sender<u64>,
}

impl Spool {
    pub(crate) fn new(capacity: usize) -> Arc<Self> {
        let (updates, _) = watch::channel(0);
        Arc::new(Self {
            capacity: capacity.max(1),
            state: Mutex::new(SpoolState {
                pending: VecDeque::new(),
                consumed: 0,
                finished: false,
                closed: false,
                failure: None,
            }),
            readable: Condvar::new(),
            updates,
        })
    }

    fn lock(&self) -> MutexGuard<'_, SpoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn signal(&self) {
        self.updates.send_modify(|count| *count += 1);
    }

    /// Queue bytes for the reader.
    ///
    /// A chunk larger than the capacity is still accepted once the backlog is empty.
    pub(crate) fn push(&self, chunk: &[u8]) -> Result<(), AppendError> {
        {
            let mut st = self.lock();
            if let Some(failure) = &st.failure {
                return Err(AppendError::Decode(failure.clone()));
            }
            if st.closed || st.finished {
                return Err(AppendError::Closed);
            }
            if !st.pending.is_empty() && st.pending.len() + chunk.len() > self.capacity {
                return Err(AppendError::QuotaExceeded);
            }
            st.pending.extend(chunk.iter().copied());
        }
        self.readable.notify_all();
        self.signal();
        Ok(())
    }

    /// No more bytes will be pushed; the reader sees EOF after the backlog.
    pub(crate) fn finish(&self) {
        self.lock().finished = true;
        self.readable.notify_all();
    }

    /// Drop the backlog and make the reader return EOF immediately.
    pub(crate) fn close(&self) {
        {
            let mut st = self.lock();
            st.closed = true;
            st.pending.clear();
        }
        self.readable.notify_all();
        self.signal();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Record a decoder failure; later pushes report it.
    pub(crate) fn fail(&self, message: String) {
        {
            let mut st = self.lock();
            if st.failure.is_none() {
                st.failure = Some(message);
            }
        }
        self.signal();
    }

    pub(crate) fn failure(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    pub(crate) fn reader(self: &Arc<Self>) -> SpoolReader {
        SpoolReader {
            spool: self.clone(),
        }
    }
}

/// [`AppendBuffer`] view of a spool. Appends complete synchronously.
pub(crate) struct SpoolBuffer {
    spool: Arc<Spool>,
}

impl SpoolBuffer {
    pub(crate) fn new(spool: Arc<Spool>) -> Self {
        Self { spool }
    }
}

#[async_trait]
impl AppendBuffer for SpoolBuffer {
    fn is_updating(&self) -> bool {
        false
    }

    fn append(&self, chunk: &[u8]) -> Result<(), AppendError> {
        self.spool.push(chunk)
    }

    fn update_end_count(&self) -> u64 {
        *self.spool.updates.borrow()
    }

    async fn update_end(&self, seen: u64) {
        let mut rx = self.spool.updates.subscribe();
        let _ = rx.wait_for(|count| *count > seen).await;
    }
}

pub(crate) struct SpoolReader {
    spool: Arc<Spool>,
}

impl Read for SpoolReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = {
            let mut st = self.spool.lock();
            while st.pending.is_empty() && !st.finished && !st.closed {
                st = self
                    .spool
                    .readable
                    .wait(st)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            if st.closed {
                return Ok(0);
            }
            let n = buf.len().min(st.pending.len());
            for (dst, src) in buf.iter_mut().zip(st.pending.drain(..n)) {
                *dst = src;
            }
            st.consumed += n as u64;
            n
        };
        if n > 0 {
            self.spool.signal();
        }
        Ok(n)
    }
}

impl Seek for SpoolReader {
    /// Only the current position and forward skips are supported.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let position = self.spool.lock().consumed;
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::Current(delta) => position.checked_add_signed(delta),
            SeekFrom::End(_) => None,
        };
        match target {
            Some(t) if t >= position => {
                let mut remaining = t - position;
                let mut scratch = [0u8; 4096];
                while remaining > 0 {
                    let want = scratch.len().min(remaining as usize);
                    let n = self.read(&mut scratch[..want])?;
                    if n == 0 {
                        break;
                    }
                    remaining -= n as u64;
                }
                Ok(t - remaining)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "spool only seeks forward",
            )),
        }
    }
}

impl MediaSource for SpoolReader {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}
