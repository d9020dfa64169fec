//! Session actor logic.
//!
//! ## Architecture
//!
//! ```text
//! Relay (tether-server)
//!   ├─ session task (mailbox, timer, channel senders)
//!   │   └─ Session ← THIS MODULE
//!   │       ├─ privileged peers, history, counter (persisted)
//!   │       └─ subscription registry (process-local)
//!   └─ Storage (scoped per session)
//! ```
//!
//! ## Responsibilities
//!
//! 1. **Existence**: a session exists iff its privileged peer set is
//!    non-empty. "Never created" and "deleted" look the same to callers.
//! 2. **Membership**: privileged peers may add peers and delete the session.
//! 3. **Fan-out**: delivery is returned as [`SessionAction`]s for the driver
//!    to execute against its channel handles (Sans-IO).
//! 4. **Expiry**: privileged activity pushes the persisted alarm forward;
//!    [`Session::alarm`] wipes the session when it fires.
//!
//! ## Persistence
//!
//! State is hydrated from storage on first use with one multi-key read.
//! Each mutation is written with one atomic `put`, carrying the renewed
//! expiry alarm when the operation keeps the session alive, before it is
//! applied in memory. A storage failure therefore leaves both the actor and
//! the store exactly as they were.

use bytes::Bytes;
use tether_proto::{
    ChannelMessage, DataMessage, HistoryEntry, Nonce, PeerId, SessionKey, SessionRequest,
    SessionResponse, SubscriptionId,
};

use crate::{
    config::SessionConfig,
    env::Environment,
    error::ActorError,
    storage::{Scope, Storage, decode_value, encode_value, keys},
    time::Timestamp,
};

/// Process-local handle of one subscription channel.
///
/// Allocated by the session; the driver maps it to the real connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

/// A registered live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Channel the subscriber listens on
    pub channel: ChannelId,
    /// Identity messages are delivered for
    pub subscriber_id: PeerId,
    /// Server-issued id
    pub subscription_id: SubscriptionId,
}

/// Actions returned by [`Session`] for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Push a message over a channel
    Send {
        /// Target channel
        channel: ChannelId,
        /// Message to push
        message: ChannelMessage,
    },
    /// The session no longer tracks this channel; drop the driver's handle
    Release {
        /// Channel to drop
        channel: ChannelId,
    },
}

/// Result of one session operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Boolean result
    Bool(bool),
    /// Subscription id, plus the new channel if the session exists
    Subscribed {
        /// Allocated id (allocated even when the session is absent)
        subscription_id: SubscriptionId,
        /// Registered channel, `None` when the session is absent
        channel: Option<ChannelId>,
    },
    /// Retained messages visible to the reader
    History(Vec<HistoryEntry>),
    /// No result
    Ack,
}

impl SessionOutcome {
    /// The structured payload sent back to the caller.
    pub fn to_response(&self) -> SessionResponse {
        match self {
            Self::Bool(value) => SessionResponse::Bool(*value),
            Self::Subscribed { subscription_id, .. } => {
                SessionResponse::Subscribed { subscription_id: *subscription_id }
            },
            Self::History(entries) => SessionResponse::History(entries.clone()),
            Self::Ack => SessionResponse::Ack,
        }
    }
}

/// Outcome of a request together with the actions it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    /// Reply to the caller
    pub outcome: SessionOutcome,
    /// Channel actions, in order
    pub actions: Vec<SessionAction>,
}

impl Handled {
    fn reply(outcome: SessionOutcome) -> Self {
        Self { outcome, actions: Vec::new() }
    }

    fn bool(value: bool) -> Self {
        Self::reply(SessionOutcome::Bool(value))
    }
}

/// Persisted part of a session.
#[derive(Debug, Clone, Default)]
struct SessionState {
    privileged_peers: Vec<PeerId>,
    message_history: Vec<HistoryEntry>,
}

impl SessionState {
    fn exists(&self) -> bool {
        !self.privileged_peers.is_empty()
    }

    fn is_privileged(&self, peer: &PeerId) -> bool {
        self.privileged_peers.contains(peer)
    }
}

/// One session actor instance.
///
/// Requests must be fed one at a time, in arrival order; the driver's
/// mailbox provides that serialization.
pub struct Session {
    key: SessionKey,
    scope: Scope,
    config: SessionConfig,

    state: SessionState,
    /// False until the first request reads `state` from storage
    hydrated: bool,

    /// Last issued subscription id. Seeded from the CSPRNG, replaced by the
    /// persisted value on hydration when one exists.
    counter: SubscriptionId,

    subscriptions: Vec<Subscription>,
    next_channel: u64,
}

impl Session {
    /// Create the actor for `key`, seeding the subscription counter from
    /// `env`'s secure random source.
    pub fn new(key: SessionKey, config: SessionConfig, env: &impl Environment) -> Self {
        Self {
            key,
            scope: Scope::Session(key),
            config,
            state: SessionState::default(),
            hydrated: false,
            counter: SubscriptionId(env.random_u32()),
            subscriptions: Vec::new(),
            next_channel: 0,
        }
    }

    /// Session key this actor serves.
    pub fn key(&self) -> SessionKey {
        self.key
    }

    /// Storage scope this actor owns.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Whether the session exists.
    ///
    /// Always false before the first request hydrates the actor.
    pub fn exists(&self) -> bool {
        self.state.exists()
    }

    /// Live subscriptions, in registration order.
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Handle one request.
    ///
    /// # Errors
    ///
    /// Returns `ActorError::Storage` if reading or writing state fails. The
    /// in-memory state is unchanged in that case, apart from the
    /// subscription counter, which advances on every subscribe.
    pub fn handle<E, S>(
        &mut self,
        request: SessionRequest,
        env: &E,
        storage: &S,
    ) -> Result<Handled, ActorError>
    where
        E: Environment,
        S: Storage,
    {
        self.hydrate(storage)?;

        match request {
            SessionRequest::CheckExists => Ok(Handled::bool(self.exists())),
            SessionRequest::Initialise { initial_peer_id } => {
                self.initialise(initial_peer_id, env, storage)
            },
            SessionRequest::Subscribe { subscriber_id } => self.subscribe(subscriber_id, storage),
            SessionRequest::Unsubscribe { subscription_id } => Ok(self.unsubscribe(subscription_id)),
            SessionRequest::AddPrivilegedPeer { adder_id, added_id } => {
                self.add_privileged_peer(&adder_id, added_id, storage)
            },
            SessionRequest::Delete { deleter_id } => self.delete(deleter_id.as_ref(), storage),
            SessionRequest::BroadcastData { data, sender_id, nonce, write_history } => {
                self.broadcast_data(data, sender_id, nonce, write_history, env, storage)
            },
            SessionRequest::UnicastData {
                data,
                sender_id,
                receiver_id,
                nonce,
                write_history,
                make_receiver_privileged,
            } => self.unicast_data(
                Unicast { data, sender_id, receiver_id, nonce, write_history, make_receiver_privileged },
                env,
                storage,
            ),
            SessionRequest::DeleteData { deleter_id, data_sender_id, data_nonce } => {
                self.delete_data(&deleter_id, &data_sender_id, &data_nonce, storage)
            },
            SessionRequest::GetHistory { reader_id, from_timestamp } => {
                Ok(self.get_history(&reader_id, from_timestamp))
            },
        }
    }

    /// Handle the wake alarm firing: wipe the session.
    ///
    /// Returns the close/release actions for every live subscription.
    ///
    /// # Errors
    ///
    /// Returns `ActorError::Storage` if the wipe cannot be persisted.
    pub fn alarm<S: Storage>(&mut self, storage: &S) -> Result<Vec<SessionAction>, ActorError> {
        self.hydrate(storage)?;
        let existed = self.exists();
        let actions = self.wipe(storage)?;

        if existed {
            tracing::info!(session = %self.key, "session expired");
        }
        Ok(actions)
    }

    /// Deregister a channel the transport reported closed.
    ///
    /// Returns false if the channel was not registered (already released).
    pub fn channel_closed(&mut self, channel: ChannelId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.channel != channel);
        let removed = self.subscriptions.len() != before;

        if removed {
            tracing::debug!(session = %self.key, channel = channel.0, "subscription closed");
        }
        removed
    }

    fn hydrate<S: Storage>(&mut self, storage: &S) -> Result<(), ActorError> {
        if self.hydrated {
            return Ok(());
        }

        let mut values = storage
            .get(&self.scope, &[keys::PRIVILEGED_PEERS, keys::MESSAGE_HISTORY, keys::SUBSCRIPTION_COUNTER])?
            .into_iter();
        let mut next = || values.next().flatten();

        let privileged_peers = decode_value(keys::PRIVILEGED_PEERS, next())?.unwrap_or_default();
        let message_history = decode_value(keys::MESSAGE_HISTORY, next())?.unwrap_or_default();
        if let Some(counter) = decode_value(keys::SUBSCRIPTION_COUNTER, next())? {
            self.counter = counter;
        }

        self.state = SessionState { privileged_peers, message_history };
        self.hydrated = true;
        Ok(())
    }

    fn initialise<E: Environment, S: Storage>(
        &mut self,
        initial_peer_id: PeerId,
        env: &E,
        storage: &S,
    ) -> Result<Handled, ActorError> {
        if self.exists() {
            return Ok(Handled::bool(false));
        }

        let privileged_peers = vec![initial_peer_id.clone()];
        let message_history = Vec::new();
        storage.put(
            &self.scope,
            vec![
                (keys::PRIVILEGED_PEERS, encode_value(keys::PRIVILEGED_PEERS, &privileged_peers)?),
                (keys::MESSAGE_HISTORY, encode_value(keys::MESSAGE_HISTORY, &message_history)?),
            ],
            Some(self.expiry(env)),
        )?;
        self.state = SessionState { privileged_peers, message_history };

        tracing::info!(session = %self.key, peer = %initial_peer_id, "session initialised");
        Ok(Handled::bool(true))
    }

    fn subscribe<S: Storage>(
        &mut self,
        subscriber_id: PeerId,
        storage: &S,
    ) -> Result<Handled, ActorError> {
        self.counter = self.counter.next();
        let subscription_id = self.counter;

        if !self.exists() {
            return Ok(Handled::reply(SessionOutcome::Subscribed { subscription_id, channel: None }));
        }

        storage.put(
            &self.scope,
            vec![(keys::SUBSCRIPTION_COUNTER, encode_value(keys::SUBSCRIPTION_COUNTER, &subscription_id)?)],
            None,
        )?;

        let channel = ChannelId(self.next_channel);
        self.next_channel += 1;
        self.subscriptions.push(Subscription { channel, subscriber_id, subscription_id });

        tracing::debug!(
            session = %self.key,
            subscription_id = subscription_id.0,
            channel = channel.0,
            "subscribed"
        );

        Ok(Handled {
            outcome: SessionOutcome::Subscribed { subscription_id, channel: Some(channel) },
            actions: vec![SessionAction::Send {
                channel,
                message: ChannelMessage::SubscriptionId(subscription_id),
            }],
        })
    }

    fn unsubscribe(&self, subscription_id: SubscriptionId) -> Handled {
        if !self.exists() {
            return Handled::reply(SessionOutcome::Ack);
        }

        let actions = self
            .subscriptions
            .iter()
            .filter(|s| s.subscription_id == subscription_id)
            .map(|s| SessionAction::Send { channel: s.channel, message: ChannelMessage::Close })
            .collect();

        Handled { outcome: SessionOutcome::Ack, actions }
    }

    fn add_privileged_peer<S: Storage>(
        &mut self,
        adder_id: &PeerId,
        added_id: PeerId,
        storage: &S,
    ) -> Result<Handled, ActorError> {
        if !self.state.is_privileged(adder_id) {
            return Ok(Handled::bool(false));
        }
        if self.state.is_privileged(&added_id) {
            return Ok(Handled::bool(true));
        }

        let mut privileged_peers = self.state.privileged_peers.clone();
        privileged_peers.push(added_id);
        self.commit_peers(privileged_peers, storage)?;

        Ok(Handled::bool(true))
    }

    fn delete<S: Storage>(
        &mut self,
        deleter_id: Option<&PeerId>,
        storage: &S,
    ) -> Result<Handled, ActorError> {
        if !self.exists() {
            return Ok(Handled::bool(false));
        }

        let authorized = match deleter_id {
            Some(peer) => self.state.is_privileged(peer),
            None => true,
        };
        if !authorized {
            return Ok(Handled::bool(false));
        }

        let actions = self.wipe(storage)?;
        tracing::info!(session = %self.key, administrative = deleter_id.is_none(), "session deleted");

        Ok(Handled { outcome: SessionOutcome::Bool(true), actions })
    }

    fn broadcast_data<E: Environment, S: Storage>(
        &mut self,
        data: Bytes,
        sender_id: PeerId,
        nonce: Nonce,
        write_history: bool,
        env: &E,
        storage: &S,
    ) -> Result<Handled, ActorError> {
        if !self.exists() {
            return Ok(Handled::bool(false));
        }

        let alarm = self.keep_alive(&self.state.privileged_peers, &sender_id, env);
        let mut message_history = None;
        let mut entries = Vec::new();
        if write_history {
            let mut history = self.state.message_history.clone();
            history.push(HistoryEntry {
                receiver_id: None,
                timestamp: nonce.timestamp(),
                data: data.clone(),
                sender_id: sender_id.clone(),
                nonce: nonce.clone(),
            });
            entries.push((keys::MESSAGE_HISTORY, encode_value(keys::MESSAGE_HISTORY, &history)?));
            message_history = Some(history);
        }

        if !entries.is_empty() || alarm.is_some() {
            storage.put(&self.scope, entries, alarm)?;
        }
        if let Some(history) = message_history {
            self.state.message_history = history;
        }

        let state = &self.state;
        let message = ChannelMessage::Data(DataMessage { data, sender_id: sender_id.clone(), nonce });
        let actions: Vec<_> = self
            .subscriptions
            .iter()
            .filter(|s| state.is_privileged(&s.subscriber_id))
            .map(|s| SessionAction::Send { channel: s.channel, message: message.clone() })
            .collect();

        tracing::debug!(
            session = %self.key,
            sender = %sender_id,
            recipients = actions.len(),
            write_history,
            "broadcast"
        );

        Ok(Handled { outcome: SessionOutcome::Bool(true), actions })
    }

    fn unicast_data<E: Environment, S: Storage>(
        &mut self,
        unicast: Unicast,
        env: &E,
        storage: &S,
    ) -> Result<Handled, ActorError> {
        let Unicast { data, sender_id, receiver_id, nonce, write_history, make_receiver_privileged } =
            unicast;

        if !self.exists() {
            return Ok(Handled::bool(false));
        }

        let mut entries = Vec::with_capacity(2);

        let promote = make_receiver_privileged
            && self.state.is_privileged(&sender_id)
            && !self.state.is_privileged(&receiver_id);
        let mut privileged_peers = None;
        if promote {
            let mut peers = self.state.privileged_peers.clone();
            peers.push(receiver_id.clone());
            entries.push((keys::PRIVILEGED_PEERS, encode_value(keys::PRIVILEGED_PEERS, &peers)?));
            privileged_peers = Some(peers);
        }

        let mut message_history = None;
        if write_history {
            let mut history = self.state.message_history.clone();
            history.push(HistoryEntry {
                receiver_id: Some(receiver_id.clone()),
                timestamp: nonce.timestamp(),
                data: data.clone(),
                sender_id: sender_id.clone(),
                nonce: nonce.clone(),
            });
            entries.push((keys::MESSAGE_HISTORY, encode_value(keys::MESSAGE_HISTORY, &history)?));
            message_history = Some(history);
        }

        let alarm = {
            let peers = privileged_peers.as_deref().unwrap_or(&self.state.privileged_peers);
            self.keep_alive(peers, &sender_id, env)
        };

        if !entries.is_empty() || alarm.is_some() {
            storage.put(&self.scope, entries, alarm)?;
            if let Some(peers) = privileged_peers {
                self.state.privileged_peers = peers;
            }
            if let Some(history) = message_history {
                self.state.message_history = history;
            }
        }

        let message = ChannelMessage::Data(DataMessage { data, sender_id: sender_id.clone(), nonce });
        let actions: Vec<_> = self
            .subscriptions
            .iter()
            .filter(|s| s.subscriber_id == receiver_id)
            .map(|s| SessionAction::Send { channel: s.channel, message: message.clone() })
            .collect();

        tracing::debug!(
            session = %self.key,
            sender = %sender_id,
            receiver = %receiver_id,
            recipients = actions.len(),
            promoted = promote,
            write_history,
            "unicast"
        );

        Ok(Handled { outcome: SessionOutcome::Bool(true), actions })
    }

    fn delete_data<S: Storage>(
        &mut self,
        deleter_id: &PeerId,
        data_sender_id: &PeerId,
        data_nonce: &Nonce,
        storage: &S,
    ) -> Result<Handled, ActorError> {
        if !self.state.is_privileged(deleter_id) {
            return Ok(Handled::bool(false));
        }

        let history = &self.state.message_history;
        if history.iter().any(|entry| entry.is_from(data_sender_id, data_nonce)) {
            let kept: Vec<_> = history
                .iter()
                .filter(|entry| !entry.is_from(data_sender_id, data_nonce))
                .cloned()
                .collect();
            storage.put(&self.scope, vec![(keys::MESSAGE_HISTORY, encode_value(keys::MESSAGE_HISTORY, &kept)?)], None)?;
            self.state.message_history = kept;
        }

        Ok(Handled::bool(true))
    }

    fn get_history(&self, reader_id: &PeerId, from_timestamp: u64) -> Handled {
        let state = &self.state;
        if !state.is_privileged(reader_id) {
            return Handled::reply(SessionOutcome::History(Vec::new()));
        }

        let entries = state
            .message_history
            .iter()
            .filter(|entry| entry.timestamp >= from_timestamp && entry.is_visible_to(reader_id))
            .cloned()
            .collect();

        Handled::reply(SessionOutcome::History(entries))
    }

    fn commit_peers<S: Storage>(
        &mut self,
        privileged_peers: Vec<PeerId>,
        storage: &S,
    ) -> Result<(), ActorError> {
        storage.put(
            &self.scope,
            vec![(keys::PRIVILEGED_PEERS, encode_value(keys::PRIVILEGED_PEERS, &privileged_peers)?)],
            None,
        )?;
        self.state.privileged_peers = privileged_peers;
        Ok(())
    }

    /// Renewed expiry alarm for activity by `peer`, if it is among
    /// `privileged_peers`.
    fn keep_alive<E: Environment>(&self, privileged_peers: &[PeerId], peer: &PeerId, env: &E) -> Option<Timestamp> {
        privileged_peers.contains(peer).then(|| self.expiry(env))
    }

    fn expiry<E: Environment>(&self, env: &E) -> Timestamp {
        env.now() + self.config.idle_timeout
    }

    /// Clear persisted state, cancel the alarm and drop every subscription.
    fn wipe<S: Storage>(&mut self, storage: &S) -> Result<Vec<SessionAction>, ActorError> {
        storage.delete_all(&self.scope)?;
        self.state = SessionState::default();

        let actions = self
            .subscriptions
            .drain(..)
            .flat_map(|s| {
                [
                    SessionAction::Send { channel: s.channel, message: ChannelMessage::Close },
                    SessionAction::Release { channel: s.channel },
                ]
            })
            .collect();
        Ok(actions)
    }
}

/// Fields of a unicast request.
struct Unicast {
    data: Bytes,
    sender_id: PeerId,
    receiver_id: PeerId,
    nonce: Nonce,
    write_history: bool,
    make_receiver_privileged: bool,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{env::testing::ManualEnv, storage::MemoryStorage, time::Timestamp};

    fn peer(id: &str) -> PeerId {
        PeerId::new(id).expect("valid peer id")
    }

    fn nonce(raw: &str) -> Nonce {
        Nonce::parse(raw).expect("valid nonce")
    }

    struct Fixture {
        env: ManualEnv,
        storage: MemoryStorage,
        session: Session,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_seed(100)
        }

        fn with_seed(seed: u32) -> Self {
            let env = ManualEnv::with_seed(1_700_000_000, seed);
            let key = SessionKey::from_u32(42).expect("key in range");
            let session = Session::new(key, SessionConfig::default(), &env);
            Self { env, storage: MemoryStorage::new(), session }
        }

        fn handle(&mut self, request: SessionRequest) -> Handled {
            self.session.handle(request, &self.env, &self.storage).expect("handle failed")
        }

        fn bool(&mut self, request: SessionRequest) -> bool {
            match self.handle(request).outcome {
                SessionOutcome::Bool(value) => value,
                other => panic!("expected bool, got {other:?}"),
            }
        }

        fn initialise(&mut self, id: &str) -> bool {
            self.bool(SessionRequest::Initialise { initial_peer_id: peer(id) })
        }

        fn subscribe(&mut self, id: &str) -> (SubscriptionId, Option<ChannelId>) {
            match self.handle(SessionRequest::Subscribe { subscriber_id: peer(id) }).outcome {
                SessionOutcome::Subscribed { subscription_id, channel } => (subscription_id, channel),
                other => panic!("expected subscribed, got {other:?}"),
            }
        }

        fn add(&mut self, adder: &str, added: &str) -> bool {
            self.bool(SessionRequest::AddPrivilegedPeer { adder_id: peer(adder), added_id: peer(added) })
        }

        fn broadcast(&mut self, sender: &str, raw_nonce: &str, write_history: bool) -> Handled {
            self.handle(SessionRequest::BroadcastData {
                data: Bytes::from_static(b"payload"),
                sender_id: peer(sender),
                nonce: nonce(raw_nonce),
                write_history,
            })
        }

        fn history(&mut self, reader: &str) -> Vec<HistoryEntry> {
            match self.handle(SessionRequest::GetHistory { reader_id: peer(reader), from_timestamp: 0 }).outcome {
                SessionOutcome::History(entries) => entries,
                other => panic!("expected history, got {other:?}"),
            }
        }

        fn alarm(&self) -> Option<Timestamp> {
            self.storage.alarm(self.session.scope()).expect("alarm read failed")
        }
    }

    fn data_channels(actions: &[SessionAction]) -> Vec<ChannelId> {
        actions
            .iter()
            .filter_map(|action| match action {
                SessionAction::Send { channel, message: ChannelMessage::Data(_) } => Some(*channel),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_check_exists_before_and_after_initialise() {
        let mut f = Fixture::new();

        assert!(!f.bool(SessionRequest::CheckExists));
        assert!(f.initialise("p1"));
        assert!(f.bool(SessionRequest::CheckExists));
    }

    #[test]
    fn test_initialise_twice_leaves_state_unchanged() {
        let mut f = Fixture::new();
        assert!(f.initialise("p1"));
        f.broadcast("p1", "n_1000", true);

        assert!(!f.initialise("p2"));
        assert!(!f.add("p2", "p3"));
        assert_eq!(f.history("p1").len(), 1);
    }

    #[test]
    fn test_initialise_arms_keep_alive() {
        let mut f = Fixture::new();
        f.initialise("p1");

        assert_eq!(f.alarm(), Some(f.env.now() + Duration::from_secs(20 * 60)));
    }

    #[test]
    fn test_add_privileged_peer_requires_privilege() {
        let mut f = Fixture::new();
        f.initialise("p1");

        assert!(!f.add("stranger", "p2"));
        assert!(!f.add("p2", "p3"));

        assert!(f.add("p1", "p2"));
        assert!(f.add("p2", "p3"));
    }

    #[test]
    fn test_add_privileged_peer_is_idempotent() {
        let mut f = Fixture::new();
        f.initialise("p1");
        assert!(f.add("p1", "p2"));
        assert!(f.add("p1", "p2"));
        assert!(f.add("p1", "p1"));

        let stored = f.storage.get(f.session.scope(), &[keys::PRIVILEGED_PEERS]).expect("get failed");
        let peers: Vec<PeerId> = decode_value(keys::PRIVILEGED_PEERS, stored.into_iter().next().flatten())
            .expect("decode failed")
            .expect("peers stored");
        assert_eq!(peers, vec![peer("p1"), peer("p2")]);
    }

    #[test]
    fn test_operations_on_absent_session_are_falsy() {
        let mut f = Fixture::new();

        assert!(!f.add("p1", "p2"));
        assert!(!f.bool(SessionRequest::Delete { deleter_id: Some(peer("p1")) }));
        assert_eq!(f.broadcast("p1", "n_1", true).outcome, SessionOutcome::Bool(false));
        assert!(f.history("p1").is_empty());
        assert_eq!(
            f.handle(SessionRequest::Unsubscribe { subscription_id: SubscriptionId(1) }),
            Handled { outcome: SessionOutcome::Ack, actions: Vec::new() }
        );
        assert!(!f.bool(SessionRequest::Delete { deleter_id: None }));
        assert_eq!(f.storage.scope_count(), 0);
    }

    #[test]
    fn test_admin_delete_of_deleted_session_is_falsy() {
        let mut f = Fixture::new();
        f.initialise("p1");

        assert!(f.bool(SessionRequest::Delete { deleter_id: None }));
        assert!(!f.bool(SessionRequest::Delete { deleter_id: None }));
    }

    #[test]
    fn test_subscribe_allocates_even_when_absent() {
        let mut f = Fixture::with_seed(7);

        let (first, channel) = f.subscribe("p1");
        assert_eq!(first, SubscriptionId(8));
        assert_eq!(channel, None);

        f.initialise("p1");
        let (second, channel) = f.subscribe("p1");
        assert_eq!(second, SubscriptionId(9));
        assert!(channel.is_some());
    }

    #[test]
    fn test_subscription_ids_wrap() {
        let mut f = Fixture::with_seed(u32::MAX - 1);
        f.initialise("p1");

        assert_eq!(f.subscribe("p1").0, SubscriptionId(u32::MAX));
        assert_eq!(f.subscribe("p1").0, SubscriptionId(0));
        assert_eq!(f.subscribe("p1").0, SubscriptionId(1));
    }

    #[test]
    fn test_subscribe_sends_id_first() {
        let mut f = Fixture::new();
        f.initialise("p1");

        let handled = f.handle(SessionRequest::Subscribe { subscriber_id: peer("p1") });
        let SessionOutcome::Subscribed { subscription_id, channel: Some(channel) } = handled.outcome
        else {
            panic!("expected a channel");
        };
        assert_eq!(handled.actions, vec![SessionAction::Send {
            channel,
            message: ChannelMessage::SubscriptionId(subscription_id),
        }]);
    }

    #[test]
    fn test_persisted_counter_survives_restart() {
        let mut f = Fixture::with_seed(500);
        f.initialise("p1");
        let (last, _) = f.subscribe("p1");

        let mut restarted = Session::new(f.session.key(), SessionConfig::default(), &ManualEnv::with_seed(0, 9));
        let handled = restarted
            .handle(SessionRequest::Subscribe { subscriber_id: peer("p1") }, &f.env, &f.storage)
            .expect("handle failed");
        assert!(matches!(
            handled.outcome,
            SessionOutcome::Subscribed { subscription_id, .. } if subscription_id == last.next()
        ));
    }

    #[test]
    fn test_broadcast_reaches_only_privileged_subscribers() {
        let mut f = Fixture::new();
        f.initialise("p1");
        f.add("p1", "p2");

        let (_, a) = f.subscribe("p1");
        let (_, b) = f.subscribe("p2");
        let (_, outsider) = f.subscribe("x");

        let handled = f.broadcast("p1", "n_1000", false);
        assert_eq!(handled.outcome, SessionOutcome::Bool(true));

        let delivered = data_channels(&handled.actions);
        assert_eq!(delivered.len(), 2);
        assert!(delivered.contains(&a.expect("channel")));
        assert!(delivered.contains(&b.expect("channel")));
        assert!(!delivered.contains(&outsider.expect("channel")));
    }

    #[test]
    fn test_broadcast_from_unprivileged_sender_does_not_keep_alive() {
        let mut f = Fixture::new();
        f.initialise("p1");
        let armed = f.alarm();

        f.env.advance(Duration::from_secs(60));
        assert_eq!(f.broadcast("stranger", "n_1", false).outcome, SessionOutcome::Bool(true));
        assert_eq!(f.alarm(), armed);

        f.broadcast("p1", "n_2", false);
        assert_eq!(f.alarm(), Some(f.env.now() + Duration::from_secs(20 * 60)));
    }

    #[test]
    fn test_unicast_reaches_every_subscription_of_receiver() {
        let mut f = Fixture::new();
        f.initialise("p1");

        let (_, first) = f.subscribe("p2");
        let (_, second) = f.subscribe("p2");
        f.subscribe("p1");

        let handled = f.handle(SessionRequest::UnicastData {
            data: Bytes::from_static(b"hi"),
            sender_id: peer("p1"),
            receiver_id: peer("p2"),
            nonce: nonce("n_1000"),
            write_history: false,
            make_receiver_privileged: false,
        });

        let mut delivered = data_channels(&handled.actions);
        delivered.sort();
        assert_eq!(delivered, vec![first.expect("channel"), second.expect("channel")]);
    }

    #[test]
    fn test_unicast_promotes_receiver_when_sender_privileged() {
        let mut f = Fixture::new();
        f.initialise("p1");

        let unicast = |sender: &str, receiver: &str| SessionRequest::UnicastData {
            data: Bytes::from_static(b"welcome"),
            sender_id: peer(sender),
            receiver_id: peer(receiver),
            nonce: nonce("n_5"),
            write_history: true,
            make_receiver_privileged: true,
        };

        f.handle(unicast("stranger", "p3"));
        assert!(!f.add("p3", "p4"));

        f.handle(unicast("p1", "p2"));
        assert!(f.add("p2", "p4"));

        let history = f.history("p2");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].receiver_id, Some(peer("p2")));
    }

    #[test]
    fn test_history_round_trip() {
        let mut f = Fixture::new();
        f.initialise("p1");
        f.add("p1", "p2");

        f.broadcast("p1", "n_1000", true);
        f.broadcast("p1", "n_2000", true);
        f.broadcast("p2", "n_1000", true);

        let history = f.history("p1");
        assert_eq!(history[0], HistoryEntry {
            receiver_id: None,
            timestamp: 1000,
            data: Bytes::from_static(b"payload"),
            sender_id: peer("p1"),
            nonce: nonce("n_1000"),
        });

        assert!(f.bool(SessionRequest::DeleteData {
            deleter_id: peer("p1"),
            data_sender_id: peer("p1"),
            data_nonce: nonce("n_1000"),
        }));

        let remaining: Vec<_> =
            f.history("p1").into_iter().map(|e| (e.sender_id, e.nonce.to_string())).collect();
        assert_eq!(remaining, vec![
            (peer("p1"), "n_2000".to_string()),
            (peer("p2"), "n_1000".to_string()),
        ]);
    }

    #[test]
    fn test_delete_data_requires_privilege_but_not_a_match() {
        let mut f = Fixture::new();
        f.initialise("p1");
        f.broadcast("p1", "n_1000", true);

        let delete = |deleter: &str| SessionRequest::DeleteData {
            deleter_id: peer(deleter),
            data_sender_id: peer("p1"),
            data_nonce: nonce("n_9"),
        };
        assert!(!f.bool(delete("stranger")));
        assert!(f.bool(delete("p1")));
        assert_eq!(f.history("p1").len(), 1);
    }

    #[test]
    fn test_history_visibility_and_lower_bound() {
        let mut f = Fixture::new();
        f.initialise("p1");
        f.add("p1", "p2");
        f.add("p1", "p3");

        f.broadcast("p1", "n_100", true);
        f.handle(SessionRequest::UnicastData {
            data: Bytes::from_static(b"secret"),
            sender_id: peer("p1"),
            receiver_id: peer("p2"),
            nonce: nonce("n_200"),
            write_history: true,
            make_receiver_privileged: false,
        });

        assert_eq!(f.history("p1").len(), 2);
        assert_eq!(f.history("p2").len(), 2);
        assert_eq!(f.history("p3").len(), 1);
        assert!(f.history("stranger").is_empty());

        let later = f.handle(SessionRequest::GetHistory { reader_id: peer("p2"), from_timestamp: 150 });
        assert!(matches!(later.outcome, SessionOutcome::History(ref e) if e.len() == 1 && e[0].timestamp == 200));
    }

    #[test]
    fn test_unsubscribe_closes_only_matching_channels() {
        let mut f = Fixture::new();
        f.initialise("p1");
        let (target, channel) = f.subscribe("p1");
        f.subscribe("p1");

        let handled = f.handle(SessionRequest::Unsubscribe { subscription_id: target });
        assert_eq!(handled.actions, vec![SessionAction::Send {
            channel: channel.expect("channel"),
            message: ChannelMessage::Close,
        }]);
        assert_eq!(f.session.subscriptions().len(), 2);
    }

    #[test]
    fn test_channel_closed_deregisters() {
        let mut f = Fixture::new();
        f.initialise("p1");
        let (_, channel) = f.subscribe("p1");
        let channel = channel.expect("channel");

        assert!(f.session.channel_closed(channel));
        assert!(!f.session.channel_closed(channel));
        assert!(data_channels(&f.broadcast("p1", "n_1", false).actions).is_empty());
    }

    #[test]
    fn test_delete_requires_privilege_unless_administrative() {
        let mut f = Fixture::new();
        f.initialise("p1");

        assert!(!f.bool(SessionRequest::Delete { deleter_id: Some(peer("stranger")) }));
        assert!(f.session.exists());

        assert!(f.bool(SessionRequest::Delete { deleter_id: None }));
        assert!(!f.session.exists());
        assert_eq!(f.alarm(), None);
        assert!(f.storage.is_vacant(f.session.scope()));
    }

    #[test]
    fn test_delete_closes_and_releases_subscriptions() {
        let mut f = Fixture::new();
        f.initialise("p1");
        let (_, channel) = f.subscribe("p1");
        let channel = channel.expect("channel");

        let handled = f.handle(SessionRequest::Delete { deleter_id: Some(peer("p1")) });
        assert_eq!(handled.actions, vec![
            SessionAction::Send { channel, message: ChannelMessage::Close },
            SessionAction::Release { channel },
        ]);
        assert!(f.session.subscriptions().is_empty());
    }

    #[test]
    fn test_alarm_wipes_session() {
        let mut f = Fixture::new();
        f.initialise("p1");
        f.subscribe("p1");
        f.broadcast("p1", "n_1", true);

        let actions = f.session.alarm(&f.storage).expect("alarm failed");
        assert_eq!(actions.len(), 2);
        assert!(!f.bool(SessionRequest::CheckExists));
        assert!(f.history("p1").is_empty());

        assert!(f.initialise("p2"));
    }

    #[test]
    fn test_storage_failure_leaves_state_untouched() {
        let mut f = Fixture::new();
        f.initialise("p1");

        f.storage.fail_writes(true);
        let result = f.session.handle(
            SessionRequest::AddPrivilegedPeer { adder_id: peer("p1"), added_id: peer("p2") },
            &f.env,
            &f.storage,
        );
        assert!(matches!(result, Err(ActorError::Storage(_))));

        f.storage.fail_writes(false);
        assert!(!f.add("p2", "p3"));
    }

    #[test]
    fn test_failed_alarm_write_does_not_create_session() {
        let mut f = Fixture::new();

        f.storage.fail_alarm_writes(true);
        let result = f.session.handle(SessionRequest::Initialise { initial_peer_id: peer("p1") }, &f.env, &f.storage);
        assert!(matches!(result, Err(ActorError::Storage(_))));
        assert!(!f.bool(SessionRequest::CheckExists));
        assert!(f.storage.is_vacant(f.session.scope()));

        f.storage.fail_alarm_writes(false);
        assert!(f.initialise("p1"));
        assert!(f.alarm().is_some());
    }

    #[test]
    fn test_failed_keep_alive_write_skips_history_and_delivery() {
        let mut f = Fixture::new();
        f.initialise("p1");
        f.subscribe("p1");
        let armed = f.alarm();

        f.env.advance(Duration::from_secs(60));
        f.storage.fail_alarm_writes(true);
        let broadcast = SessionRequest::BroadcastData {
            data: Bytes::from_static(b"payload"),
            sender_id: peer("p1"),
            nonce: nonce("n_1"),
            write_history: true,
        };
        let result = f.session.handle(broadcast.clone(), &f.env, &f.storage);
        assert!(matches!(result, Err(ActorError::Storage(_))));

        let unicast = SessionRequest::UnicastData {
            data: Bytes::from_static(b"payload"),
            sender_id: peer("p1"),
            receiver_id: peer("p2"),
            nonce: nonce("n_2"),
            write_history: true,
            make_receiver_privileged: true,
        };
        let result = f.session.handle(unicast, &f.env, &f.storage);
        assert!(matches!(result, Err(ActorError::Storage(_))));

        f.storage.fail_alarm_writes(false);
        assert!(f.history("p1").is_empty());
        assert!(!f.add("p2", "p3"), "promotion must not have been applied");
        assert_eq!(f.alarm(), armed);

        // A retry applies exactly once
        let handled = f.handle(broadcast);
        assert_eq!(data_channels(&handled.actions).len(), 1);
        assert_eq!(f.history("p1").len(), 1);
        assert_eq!(f.alarm(), Some(f.env.now() + Duration::from_secs(20 * 60)));
    }
}
