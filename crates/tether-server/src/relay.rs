//! Per-key actor registry.
//!
//! The relay maps session keys and peer ids to running actor tasks,
//! spawning a task on first use. Tasks hydrate from storage lazily and
//! re-arm their timer from the persisted alarm, so a respawned task picks
//! up where the previous one stopped.
//!
//! The registry holds session mailboxes weakly. A session task stays up
//! while its session exists, has subscriptions, or was used within the
//! session idle timeout, and while any caller holds its handle. After that
//! the task stops and its registry entry is pruned on the next spawn, so
//! the registry is bounded by the sessions in use rather than every key
//! ever asked about. A respawned absent session draws a fresh subscription
//! counter seed, the same as on first contact.
//!
//! Guard tasks exit once their state is reclaimed and are respawned on the
//! next request.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tether_core::{Environment, ReplayGuard, Session, Storage};
use tether_proto::{GuardRequest, NonceRecord, PeerId, SessionKey, SessionRequest};
use tokio::sync::mpsc;

use crate::{
    actor::{GuardTask, SessionCommand, SessionTask},
    channel::SessionReply,
    config::RelayConfig,
    error::RelayError,
    handle::{GuardHandle, SessionHandle},
};

/// Random keys tried by [`Relay::create_session`] before giving up.
const CREATE_SESSION_ATTEMPTS: usize = 64;

/// Handles to respawn a guard after it exits between lookup and send.
const GUARD_SEND_ATTEMPTS: usize = 2;

/// Registry and spawner of session and replay guard actors.
///
/// Must be used from within a tokio runtime.
pub struct Relay<E, S> {
    inner: Arc<RelayInner<E, S>>,
}

impl<E, S> Clone for Relay<E, S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct RelayInner<E, S> {
    config: RelayConfig,
    env: E,
    storage: S,
    sessions: Mutex<HashMap<SessionKey, mpsc::WeakSender<SessionCommand>>>,
    guards: Mutex<HashMap<PeerId, GuardHandle>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn live_sender(weak: &mpsc::WeakSender<SessionCommand>) -> Option<mpsc::Sender<SessionCommand>> {
    weak.upgrade().filter(|tx| !tx.is_closed())
}

impl<E: Environment, S: Storage> Relay<E, S> {
    /// Create a relay over `storage`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` if `config` is invalid.
    pub fn new(config: RelayConfig, env: E, storage: S) -> Result<Self, RelayError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RelayInner {
                config,
                env,
                storage,
                sessions: Mutex::new(HashMap::new()),
                guards: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Handle to the session task for `key`, spawning it if needed.
    pub fn session(&self, key: SessionKey) -> SessionHandle {
        let mut sessions = lock(&self.inner.sessions);
        if let Some(tx) = sessions.get(&key).and_then(live_sender) {
            return SessionHandle::new(key, tx);
        }
        sessions.retain(|_, weak| live_sender(weak).is_some());

        let inner = &self.inner;
        let (tx, rx) = mpsc::channel(inner.config.mailbox_capacity);
        let session = Session::new(key, inner.config.session.clone(), &inner.env);
        let task = SessionTask::new(
            session,
            inner.env.clone(),
            inner.storage.clone(),
            rx,
            tx.clone(),
            inner.config.session.idle_timeout,
        );
        tokio::spawn(task.run());

        sessions.insert(key, tx.downgrade());
        SessionHandle::new(key, tx)
    }

    /// Handle to the replay guard task for `peer`, spawning it if needed.
    pub fn guard(&self, peer: &PeerId) -> GuardHandle {
        let mut guards = lock(&self.inner.guards);
        if let Some(handle) = guards.get(peer).filter(|h| !h.is_closed()) {
            return handle.clone();
        }

        let inner = &self.inner;
        let (tx, rx) = mpsc::channel(inner.config.mailbox_capacity);
        let guard = ReplayGuard::new(peer.clone(), inner.config.guard.clone());
        tokio::spawn(GuardTask::new(guard, inner.env.clone(), inner.storage.clone(), rx).run());

        let handle = GuardHandle::new(peer.clone(), tx);
        guards.insert(peer.clone(), handle.clone());
        handle
    }

    /// Create a session with a fresh random key, privileged to
    /// `initial_peer_id`.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::KeySpaceExhausted` if every key tried was taken,
    /// or any error of the underlying `initialise`.
    pub async fn create_session(&self, initial_peer_id: PeerId) -> Result<SessionKey, RelayError> {
        for _ in 0..CREATE_SESSION_ATTEMPTS {
            let key = SessionKey::from_entropy(self.inner.env.random_u64());
            if self.session(key).initialise(initial_peer_id.clone()).await? {
                return Ok(key);
            }
            tracing::debug!(session = %key, "session key taken, retrying");
        }
        Err(RelayError::KeySpaceExhausted { attempts: CREATE_SESSION_ATTEMPTS })
    }

    /// Check `record` against `peer`'s replay guard.
    ///
    /// # Errors
    ///
    /// Returns any error of the guard; a guard that exits concurrently is
    /// respawned transparently.
    pub async fn check_nonce_is_used(&self, peer: &PeerId, record: NonceRecord) -> Result<bool, RelayError> {
        let mut result = Err(RelayError::MailboxClosed);
        for _ in 0..GUARD_SEND_ATTEMPTS {
            result = self.guard(peer).check_nonce_is_used(record).await;
            if !matches!(result, Err(RelayError::MailboxClosed)) {
                break;
            }
        }
        result
    }

    /// Decode a CBOR session request and run it.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Protocol` for malformed input, which never
    /// reaches the actor.
    pub async fn dispatch_session(&self, key: SessionKey, bytes: &[u8]) -> Result<SessionReply, RelayError> {
        let request = SessionRequest::decode(bytes)?;
        tracing::debug!(session = %key, kind = request.kind(), "dispatch");
        self.session(key).request(request).await
    }

    /// Decode a CBOR guard request and run it.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Protocol` for malformed input.
    pub async fn dispatch_guard(&self, peer: &PeerId, bytes: &[u8]) -> Result<bool, RelayError> {
        match GuardRequest::decode(bytes)? {
            GuardRequest::CheckNonceIsUsed(record) => self.check_nonce_is_used(peer, record).await,
        }
    }

    /// Number of session tasks still running.
    pub fn live_session_count(&self) -> usize {
        lock(&self.inner.sessions).values().filter(|weak| live_sender(weak).is_some()).count()
    }

    /// Number of guard tasks still running.
    pub fn live_guard_count(&self) -> usize {
        lock(&self.inner.guards).values().filter(|h| !h.is_closed()).count()
    }

    /// The storage backend shared by all actors.
    pub fn storage(&self) -> &S {
        &self.inner.storage
    }
}
