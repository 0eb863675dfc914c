//! Single-slot playback session manager.
//!
//! Chunks are routed by playback identity. A chunk for a new identity tears down whatever
//! occupies the slot before the new session is opened; chunks for the same identity share
//! the live session (or wait for it to finish initializing).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use speechy_types::{SessionPhase, SessionSnapshot};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::PlaybackConfig;
use crate::controller::PlaybackController;
use crate::decode_pipe::DecodePipe;
use crate::error::{PlayerError, Result};
use crate::host::MediaHost;
use crate::session::PlaybackSession;

#[derive(Clone, Debug)]
enum InitStatus {
    Pending,
    Ready,
    Failed(String),
    Superseded,
}

enum Slot {
    Empty,
    Initializing {
        identity: String,
        generation: u64,
        ready: watch::Receiver<InitStatus>,
    },
    Live(Arc<PlaybackSession>),
}

struct Slots {
    slot: Slot,
    generation: u64,
    /// Identities that may no longer start or feed a session, oldest first.
    retired: VecDeque<String>,
    history: usize,
}

impl Slots {
    fn retire(&mut self, identity: &str) {
        if self.history == 0 || self.is_retired(identity) {
            return;
        }
        self.retired.push_back(identity.to_string());
        while self.retired.len() > self.history {
            self.retired.pop_front();
        }
    }

    fn is_retired(&self, identity: &str) -> bool {
        self.retired.iter().any(|r| r == identity)
    }

    /// Empty the slot, retiring the identity it held.
    fn vacate(&mut self) -> Option<Arc<PlaybackSession>> {
        match std::mem::replace(&mut self.slot, Slot::Empty) {
            Slot::Empty => None,
            Slot::Initializing { identity, .. } => {
                self.retire(&identity);
                None
            }
            Slot::Live(session) => {
                self.retire(session.identity());
                Some(session)
            }
        }
    }
}

enum Claim {
    Live(Arc<PlaybackSession>),
    Wait(watch::Receiver<InitStatus>, u64),
    Init(watch::Sender<InitStatus>, u64),
}

struct Inner {
    host: Arc<dyn MediaHost>,
    config: PlaybackConfig,
    pipe: DecodePipe,
    controller: PlaybackController,
    slots: Mutex<Slots>,
}

/// Cheap to clone; all clones share the same slot.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(host: Arc<dyn MediaHost>, config: PlaybackConfig) -> Self {
        let slots = Slots {
            slot: Slot::Empty,
            generation: 0,
            retired: VecDeque::new(),
            history: config.retired_history,
        };
        Self {
            inner: Arc::new(Inner {
                pipe: DecodePipe::new(host.clone()),
                controller: PlaybackController::new(&config),
                host,
                config,
                slots: Mutex::new(slots),
            }),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.inner.config
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue one chunk for `identity` and drive the decode pipe.
    ///
    /// Returns once the chunk is queued and, if this call owns the drain, everything queued
    /// so far has been appended. Fatal errors tear the session down before they are returned.
    pub async fn append_chunk(
        &self,
        chunk: Vec<u8>,
        is_last_chunk: bool,
        identity: &str,
    ) -> Result<()> {
        let session = self.acquire(identity).await?;
        {
            let mut st = session.state();
            session.ensure_live()?;
            if st.queue.end_of_stream() {
                return Err(PlayerError::Transport(format!(
                    "chunk for {identity} arrived after its final chunk"
                )));
            }
            let bytes = chunk.len();
            st.queue.enqueue(chunk, is_last_chunk);
            st.last_activity = Instant::now();
            tracing::debug!(
                identity,
                bytes,
                is_last_chunk,
                queued = st.queue.len(),
                "chunk queued"
            );
        }

        match self.inner.pipe.drain(&session, &self.inner.controller).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                self.fail(&session, &e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn acquire(&self, identity: &str) -> Result<Arc<PlaybackSession>> {
        loop {
            match self.claim(identity)? {
                Claim::Live(session) => return Ok(session),
                Claim::Init(ready, generation) => {
                    return self.initialize(identity, generation, ready).await;
                }
                Claim::Wait(mut ready, generation) => {
                    let status = ready
                        .wait_for(|s| !matches!(s, InitStatus::Pending))
                        .await
                        .map(|s| s.clone());
                    match status {
                        Ok(InitStatus::Ready) | Ok(InitStatus::Pending) => continue,
                        Ok(InitStatus::Failed(message)) => {
                            return Err(PlayerError::Initialization(message));
                        }
                        Ok(InitStatus::Superseded) => {
                            return Err(PlayerError::Inactive(identity.to_string()));
                        }
                        Err(_) => {
                            // initializer dropped without reporting
                            self.abandon(generation);
                            continue;
                        }
                    }
                }
            }
        }
    }

    fn claim(&self, identity: &str) -> Result<Claim> {
        let mut slots = self.slots();
        match &slots.slot {
            Slot::Live(session) if session.identity() == identity => {
                return Ok(Claim::Live(session.clone()));
            }
            Slot::Initializing {
                identity: pending,
                generation,
                ready,
            } if pending == identity => {
                return Ok(Claim::Wait(ready.clone(), *generation));
            }
            _ => {}
        }
        if slots.is_retired(identity) {
            return Err(PlayerError::Inactive(identity.to_string()));
        }

        if let Some(previous) = slots.vacate() {
            tracing::info!(
                previous = %previous.identity(),
                next = identity,
                "superseding playback session"
            );
            previous.teardown();
        }
        slots.generation += 1;
        let generation = slots.generation;
        let (ready_tx, ready_rx) = watch::channel(InitStatus::Pending);
        slots.slot = Slot::Initializing {
            identity: identity.to_string(),
            generation,
            ready: ready_rx,
        };
        Ok(Claim::Init(ready_tx, generation))
    }

    async fn initialize(
        &self,
        identity: &str,
        generation: u64,
        ready: watch::Sender<InitStatus>,
    ) -> Result<Arc<PlaybackSession>> {
        tracing::info!(identity, "initializing playback session");
        let opened = self.inner.host.open_session().await;

        let mut slots = self.slots();
        let current = matches!(
            &slots.slot,
            Slot::Initializing { generation: g, .. } if *g == generation
        );
        match opened {
            Ok(opened) if current => {
                let session = Arc::new(PlaybackSession::new(identity.to_string(), opened));
                slots.slot = Slot::Live(session.clone());
                drop(slots);
                ready.send_replace(InitStatus::Ready);
                tracing::info!(identity, hint = ?session.format_hint(), "playback session active");
                Ok(session)
            }
            Ok(opened) => {
                drop(slots);
                opened.sink.release();
                opened.decode.close();
                ready.send_replace(InitStatus::Superseded);
                tracing::debug!(identity, "session superseded while initializing");
                Err(PlayerError::Inactive(identity.to_string()))
            }
            Err(e) => {
                if current {
                    slots.slot = Slot::Empty;
                    slots.retire(identity);
                }
                drop(slots);
                let message = e.to_string();
                ready.send_replace(InitStatus::Failed(message.clone()));
                tracing::error!(identity, error = %message, "session initialization failed");
                Err(PlayerError::Initialization(message))
            }
        }
    }

    fn abandon(&self, generation: u64) {
        let mut slots = self.slots();
        if matches!(&slots.slot, Slot::Initializing { generation: g, .. } if *g == generation) {
            slots.slot = Slot::Empty;
        }
    }

    fn fail(&self, session: &Arc<PlaybackSession>, error: &PlayerError) {
        tracing::error!(identity = %session.identity(), error = %error, "playback failed; tearing down");
        {
            let mut slots = self.slots();
            let current = matches!(&slots.slot, Slot::Live(s) if Arc::ptr_eq(s, session));
            if current {
                slots.vacate();
            } else {
                slots.retire(session.identity());
            }
        }
        session.teardown();
    }

    /// Tear down the current session, if any. Safe to call repeatedly.
    pub fn cleanup(&self) {
        let previous = self.slots().vacate();
        if let Some(session) = previous {
            session.teardown();
        }
    }

    /// Tear down a session whose final chunk never arrived within the idle timeout.
    ///
    /// Returns the identity that was torn down.
    pub fn sweep_idle(&self) -> Option<String> {
        let timeout = self.inner.config.idle_timeout?;
        let expired = {
            let mut slots = self.slots();
            let idle = matches!(&slots.slot, Slot::Live(s) if s.is_idle(timeout));
            if !idle {
                return None;
            }
            slots.vacate()?
        };
        tracing::warn!(
            identity = %expired.identity(),
            timeout_ms = timeout.as_millis() as u64,
            "no final chunk before idle timeout"
        );
        expired.teardown();
        Some(expired.identity().to_string())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let slots = self.slots();
        match &slots.slot {
            Slot::Empty => SessionSnapshot::empty(),
            Slot::Initializing { identity, .. } => SessionSnapshot {
                phase: SessionPhase::Initializing,
                identity: Some(identity.clone()),
                ..SessionSnapshot::empty()
            },
            Slot::Live(session) => session.snapshot(),
        }
    }

    /// Identity of a session that is still accepting chunks.
    pub fn open_identity(&self) -> Option<String> {
        let slots = self.slots();
        match &slots.slot {
            Slot::Empty => None,
            Slot::Initializing { identity, .. } => Some(identity.clone()),
            Slot::Live(session) => {
                let accepting = !session.state().queue.end_of_stream();
                accepting.then(|| session.identity().to_string())
            }
        }
    }

    /// Whether the slot holds `identity` and its sink has played the complete stream.
    pub fn has_finished(&self, identity: &str) -> bool {
        let slots = self.slots();
        matches!(&slots.slot, Slot::Live(s) if s.identity() == identity && s.has_finished())
    }
}
