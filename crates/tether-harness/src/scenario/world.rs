//! World state for scenario execution.
//!
//! The World owns a single session actor with its environment and storage,
//! plays the role of the runtime for it (channel inboxes, alarm firing),
//! and keeps a record of everything that happened for the oracle.

use std::collections::BTreeMap;

use tether_core::{
    ActorError, ChannelId, Environment, Handled, MemoryStorage, Session, SessionAction,
    SessionConfig, SessionOutcome, Storage, Timestamp,
};
use tether_proto::{ChannelMessage, DataMessage, PeerId, SessionKey, SessionRequest};

use crate::sim_env::SimEnv;

/// A subscription channel as seen from the subscriber's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbox {
    /// Identity the channel was opened for
    pub subscriber_id: PeerId,
    /// Messages received, in order
    pub messages: Vec<ChannelMessage>,
    /// The session released the channel
    pub released: bool,
}

impl Inbox {
    /// Delivered data messages, in order.
    pub fn data(&self) -> Vec<&DataMessage> {
        self.messages
            .iter()
            .filter_map(|message| match message {
                ChannelMessage::Data(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Number of `Close` notices received.
    pub fn closes(&self) -> usize {
        self.messages.iter().filter(|m| **m == ChannelMessage::Close).count()
    }
}

/// World state: one session, its channels, and a log of outcomes.
pub struct World {
    env: SimEnv,
    storage: MemoryStorage,
    session: Session,
    inboxes: BTreeMap<ChannelId, Inbox>,
    outcomes: Vec<SessionOutcome>,
    alarms_fired: usize,
}

impl World {
    /// Create a world around a fresh session actor.
    pub fn new(key: SessionKey, config: SessionConfig, env: SimEnv) -> Self {
        let session = Session::new(key, config, &env);
        Self {
            env,
            storage: MemoryStorage::new(),
            session,
            inboxes: BTreeMap::new(),
            outcomes: Vec::new(),
            alarms_fired: 0,
        }
    }

    /// Apply one request and execute its actions.
    pub(crate) fn request(&mut self, request: SessionRequest) -> Result<(), ActorError> {
        let subscriber = match &request {
            SessionRequest::Subscribe { subscriber_id } => Some(subscriber_id.clone()),
            _ => None,
        };

        let Handled { outcome, actions } = self.session.handle(request, &self.env, &self.storage)?;

        if let (SessionOutcome::Subscribed { channel: Some(channel), .. }, Some(subscriber_id)) =
            (&outcome, subscriber)
        {
            self.inboxes.insert(*channel, Inbox { subscriber_id, messages: Vec::new(), released: false });
        }

        self.execute(actions);
        self.outcomes.push(outcome);
        Ok(())
    }

    /// Advance the clock and fire the alarm if it has come due.
    pub(crate) fn advance(&mut self, by: std::time::Duration) -> Result<(), ActorError> {
        self.env.advance(by);

        let due = self.alarm().is_some_and(|at| at <= self.env.now());
        if due {
            let actions = self.session.alarm(&self.storage)?;
            self.execute(actions);
            self.alarms_fired += 1;
        }
        Ok(())
    }

    /// Subscriber closes `channel`.
    pub(crate) fn close_channel(&mut self, channel: ChannelId) {
        if let Some(inbox) = self.inboxes.get_mut(&channel) {
            inbox.released = true;
        }
        self.session.channel_closed(channel);
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Send { channel, message } => {
                    if let Some(inbox) = self.inboxes.get_mut(&channel).filter(|i| !i.released) {
                        inbox.messages.push(message);
                    }
                },
                SessionAction::Release { channel } => {
                    if let Some(inbox) = self.inboxes.get_mut(&channel) {
                        inbox.released = true;
                    }
                },
            }
        }
    }

    /// The session actor.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether the session exists.
    pub fn exists(&self) -> bool {
        self.session.exists()
    }

    /// Outcomes of every request, in order.
    pub fn outcomes(&self) -> &[SessionOutcome] {
        &self.outcomes
    }

    /// Outcome of the most recent request.
    pub fn last_outcome(&self) -> Option<&SessionOutcome> {
        self.outcomes.last()
    }

    /// Every channel ever opened, by id.
    pub fn inboxes(&self) -> &BTreeMap<ChannelId, Inbox> {
        &self.inboxes
    }

    /// Channel `index` in opening order.
    pub fn inbox(&self, index: usize) -> Option<&Inbox> {
        self.inboxes.values().nth(index)
    }

    /// Channels opened for `subscriber`.
    pub fn inboxes_of<'a>(&'a self, subscriber: &'a str) -> impl Iterator<Item = &'a Inbox> + 'a {
        self.inboxes.values().filter(move |inbox| inbox.subscriber_id.as_str() == subscriber)
    }

    /// The session's pending alarm.
    pub fn alarm(&self) -> Option<Timestamp> {
        self.storage.alarm(self.session.scope()).ok().flatten()
    }

    /// Number of times the alarm fired.
    pub fn alarms_fired(&self) -> usize {
        self.alarms_fired
    }

    /// The storage backend.
    pub fn storage(&self) -> &MemoryStorage {
        &self.storage
    }

    /// The environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }
}
