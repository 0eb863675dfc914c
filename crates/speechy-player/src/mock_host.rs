//! Scripted in-memory host used by the session tests.
//!
//! Every observable host call is appended to an event log so tests can assert ordering.
//! Appends complete asynchronously after a configurable (optionally random) delay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;

use crate::format::ContainerFormat;
use crate::host::{
    AppendBuffer, AppendError, AudioSink, DecodeSession, HostError, MediaHost, OpenedSession,
};

/// Host call, tagged with the index of the session it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    SessionOpened(usize),
    BufferAdded(usize, ContainerFormat),
    AppendStart(usize, Vec<u8>),
    AppendComplete(usize),
    QuotaRejected(usize),
    EndOfStream(usize),
    Play(usize),
    PlayFailed(usize),
    Pause(usize),
    SinkReleased(usize),
    SessionClosed(usize),
}

enum Delay {
    Fixed(Duration),
    Random { min_ms: u64, max_ms: u64, rng: StdRng },
}

struct Shared {
    events: Mutex<Vec<Event>>,
    sessions: AtomicUsize,
    appends: AtomicUsize,
    delay: Mutex<Delay>,
    quota_rejections: AtomicU32,
    quota_until_play: AtomicBool,
    decode_fail_at: Mutex<VecDeque<usize>>,
    play_failures: AtomicU32,
    unsupported: Mutex<Vec<ContainerFormat>>,
    open_delay: Mutex<Duration>,
    open_failure: Mutex<Option<String>>,
    enough_data: AtomicBool,
    overlapping_append: AtomicBool,
    eos_while_updating: AtomicBool,
}

impl Shared {
    fn log(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn has_played(&self, session: usize) -> bool {
        self.events.lock().unwrap().contains(&Event::Play(session))
    }

    fn next_delay(&self) -> Duration {
        match &mut *self.delay.lock().unwrap() {
            Delay::Fixed(d) => *d,
            Delay::Random { min_ms, max_ms, rng } => {
                Duration::from_millis(rng.gen_range(*min_ms..=*max_ms))
            }
        }
    }
}

#[derive(Clone)]
pub(crate) struct MockHost {
    shared: Arc<Shared>,
}

impl MockHost {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                events: Mutex::new(Vec::new()),
                sessions: AtomicUsize::new(0),
                appends: AtomicUsize::new(0),
                delay: Mutex::new(Delay::Fixed(Duration::from_millis(5))),
                quota_rejections: AtomicU32::new(0),
                quota_until_play: AtomicBool::new(false),
                decode_fail_at: Mutex::new(VecDeque::new()),
                play_failures: AtomicU32::new(0),
                unsupported: Mutex::new(Vec::new()),
                open_delay: Mutex::new(Duration::ZERO),
                open_failure: Mutex::new(None),
                enough_data: AtomicBool::new(false),
                overlapping_append: AtomicBool::new(false),
                eos_while_updating: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn set_append_delay(&self, delay: Duration) {
        *self.shared.delay.lock().unwrap() = Delay::Fixed(delay);
    }

    pub(crate) fn set_random_append_delay(&self, seed: u64, min_ms: u64, max_ms: u64) {
        *self.shared.delay.lock().unwrap() = Delay::Random {
            min_ms,
            max_ms,
            rng: StdRng::seed_from_u64(seed),
        };
    }

    /// Reject the next `n` appends with a quota error.
    pub(crate) fn reject_next_appends_with_quota(&self, n: u32) {
        self.shared.quota_rejections.store(n, Ordering::SeqCst);
    }

    /// Reject every append as over quota until the session's sink has played.
    ///
    /// Rejections never raise a completion, like a backlog nothing is consuming.
    pub(crate) fn hold_quota_until_play(&self) {
        self.shared.quota_until_play.store(true, Ordering::SeqCst);
    }

    /// Fail the append with the given zero-based index (counted across all sessions).
    pub(crate) fn fail_append_at(&self, index: usize) {
        self.shared.decode_fail_at.lock().unwrap().push_back(index);
    }

    pub(crate) fn fail_next_plays(&self, n: u32) {
        self.shared.play_failures.store(n, Ordering::SeqCst);
    }

    pub(crate) fn set_unsupported(&self, format: ContainerFormat) {
        self.shared.unsupported.lock().unwrap().push(format);
    }

    pub(crate) fn set_open_delay(&self, delay: Duration) {
        *self.shared.open_delay.lock().unwrap() = delay;
    }

    /// Fail the next `open_session` call.
    pub(crate) fn fail_next_open(&self, message: &str) {
        *self.shared.open_failure.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn set_enough_data(&self, enough: bool) {
        self.shared.enough_data.store(enough, Ordering::SeqCst);
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.shared.events.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    /// Bytes handed to `append` for one session, in submission order.
    pub(crate) fn appended(&self, session: usize) -> Vec<Vec<u8>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::AppendStart(idx, bytes) if idx == session => Some(bytes),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn saw_overlapping_append(&self) -> bool {
        self.shared.overlapping_append.load(Ordering::SeqCst)
    }

    pub(crate) fn saw_eos_while_updating(&self) -> bool {
        self.shared.eos_while_updating.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaHost for MockHost {
    fn supports(&self, format: ContainerFormat) -> bool {
        !self.shared.unsupported.lock().unwrap().contains(&format)
    }

    async fn open_session(&self) -> Result<OpenedSession, HostError> {
        let delay = *self.shared.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.shared.open_failure.lock().unwrap().take() {
            return Err(HostError::Failed(message));
        }
        let index = self.shared.sessions.fetch_add(1, Ordering::SeqCst);
        self.shared.log(Event::SessionOpened(index));
        Ok(OpenedSession {
            decode: Arc::new(MockDecode {
                index,
                shared: self.shared.clone(),
                open: AtomicBool::new(true),
                updating: Mutex::new(None),
            }),
            sink: Arc::new(MockSink {
                index,
                shared: self.shared.clone(),
                paused: AtomicBool::new(true),
            }),
        })
    }
}

struct MockDecode {
    index: usize,
    shared: Arc<Shared>,
    open: AtomicBool,
    updating: Mutex<Option<Arc<AtomicBool>>>,
}

impl DecodeSession for MockDecode {
    fn add_buffer(&self, format: ContainerFormat) -> Result<Arc<dyn AppendBuffer>, HostError> {
        self.shared.log(Event::BufferAdded(self.index, format));
        let updating = Arc::new(AtomicBool::new(false));
        *self.updating.lock().unwrap() = Some(updating.clone());
        let (done_tx, _) = watch::channel(0u64);
        Ok(Arc::new(MockBuffer {
            index: self.index,
            shared: self.shared.clone(),
            updating,
            done_tx: Arc::new(done_tx),
        }))
    }

    fn end_of_stream(&self) -> Result<(), HostError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(HostError::Closed);
        }
        let busy = self
            .updating
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|u| u.load(Ordering::SeqCst));
        if busy {
            self.shared.eos_while_updating.store(true, Ordering::SeqCst);
        }
        self.shared.log(Event::EndOfStream(self.index));
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.shared.log(Event::SessionClosed(self.index));
    }
}

struct MockBuffer {
    index: usize,
    shared: Arc<Shared>,
    updating: Arc<AtomicBool>,
    done_tx: Arc<watch::Sender<u64>>,
}

impl MockBuffer {
    fn complete_after(&self, delay: Duration, event: Option<Event>) {
        let shared = self.shared.clone();
        let updating = self.updating.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            updating.store(false, Ordering::SeqCst);
            if let Some(event) = event {
                shared.log(event);
            }
            done_tx.send_modify(|count| *count += 1);
        });
    }
}

#[async_trait]
impl AppendBuffer for MockBuffer {
    fn is_updating(&self) -> bool {
        self.updating.load(Ordering::SeqCst)
    }

    fn append(&self, chunk: &[u8]) -> Result<(), AppendError> {
        if self.updating.load(Ordering::SeqCst) {
            self.shared.overlapping_append.store(true, Ordering::SeqCst);
            return Err(AppendError::Decode("append while updating".into()));
        }
        if self.shared.quota_until_play.load(Ordering::SeqCst)
            && !self.shared.has_played(self.index)
        {
            self.shared.log(Event::QuotaRejected(self.index));
            return Err(AppendError::QuotaExceeded);
        }
        let rejected = self
            .shared
            .quota_rejections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            self.shared.log(Event::QuotaRejected(self.index));
            // consumption frees space later
            self.complete_after(self.shared.next_delay(), None);
            return Err(AppendError::QuotaExceeded);
        }
        let index = self.shared.appends.fetch_add(1, Ordering::SeqCst);
        {
            let mut fail_at = self.shared.decode_fail_at.lock().unwrap();
            if let Some(pos) = fail_at.iter().position(|i| *i == index) {
                fail_at.remove(pos);
                return Err(AppendError::Decode("malformed chunk".into()));
            }
        }
        self.shared.log(Event::AppendStart(self.index, chunk.to_vec()));
        self.updating.store(true, Ordering::SeqCst);
        self.complete_after(self.shared.next_delay(), Some(Event::AppendComplete(self.index)));
        Ok(())
    }

    fn update_end_count(&self) -> u64 {
        *self.done_tx.borrow()
    }

    async fn update_end(&self, seen: u64) {
        let mut rx = self.done_tx.subscribe();
        let _ = rx.wait_for(|count| *count > seen).await;
    }
}

struct MockSink {
    index: usize,
    shared: Arc<Shared>,
    paused: AtomicBool,
}

#[async_trait]
impl AudioSink for MockSink {
    async fn play(&self) -> Result<(), HostError> {
        let failing = self
            .shared
            .play_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.shared.log(Event::PlayFailed(self.index));
            return Err(HostError::NotReady("not enough data decoded".into()));
        }
        self.shared.log(Event::Play(self.index));
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.shared.log(Event::Pause(self.index));
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn has_enough_data(&self) -> bool {
        self.shared.enough_data.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.shared.log(Event::SinkReleased(self.index));
    }
}
