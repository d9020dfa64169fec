//! Scenario builder API.
//!
//! Provides a declarative API for constructing session scenarios that
//! enforce the Oracle Pattern.

use std::time::Duration;

use bytes::Bytes;
use tether_core::{ChannelId, SessionConfig};
use tether_proto::{Nonce, PeerId, SessionKey, SessionRequest, SubscriptionId};

use crate::{
    scenario::{OracleFn, World},
    sim_env::SimEnv,
};

/// One step of a scenario.
#[derive(Debug, Clone)]
pub enum Step {
    /// Send a request to the session
    Request(SessionRequest),
    /// Advance virtual time, firing the alarm if it comes due
    Advance(Duration),
    /// The subscriber of channel `n` (in opening order) disconnects
    CloseChannel(usize),
    /// Unsubscribe the id delivered on channel `n`
    UnsubscribeChannel(usize),
}

/// Scenario builder.
///
/// Add steps with the helper methods (peer ids and nonces are given as
/// strings and must be valid), then attach an oracle to get a runnable
/// scenario.
pub struct Scenario {
    seed: u64,
    key: u32,
    config: SessionConfig,
    steps: Vec<Step>,
}

fn peer(id: &str) -> PeerId {
    PeerId::new(id).unwrap_or_else(|e| panic!("invalid peer id {id:?} in scenario: {e}"))
}

fn nonce(raw: &str) -> Nonce {
    Nonce::parse(raw).unwrap_or_else(|e| panic!("invalid nonce {raw:?} in scenario: {e}"))
}

impl Scenario {
    /// Create an empty scenario with default configuration and seed 0.
    pub fn new() -> Self {
        Self { seed: 0, key: 0, config: SessionConfig::default(), steps: Vec::new() }
    }

    /// Seed for the environment's RNG (and so the subscription ids).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Session configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a raw step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a raw request.
    pub fn request(self, request: SessionRequest) -> Self {
        self.step(Step::Request(request))
    }

    /// `check_exists`
    pub fn check_exists(self) -> Self {
        self.request(SessionRequest::CheckExists)
    }

    /// `initialise(peer)`
    pub fn initialise(self, initial_peer_id: &str) -> Self {
        self.request(SessionRequest::Initialise { initial_peer_id: peer(initial_peer_id) })
    }

    /// `subscribe(peer)`
    pub fn subscribe(self, subscriber_id: &str) -> Self {
        self.request(SessionRequest::Subscribe { subscriber_id: peer(subscriber_id) })
    }

    /// `unsubscribe(id)`
    pub fn unsubscribe(self, subscription_id: u32) -> Self {
        self.request(SessionRequest::Unsubscribe { subscription_id: SubscriptionId(subscription_id) })
    }

    /// `add_privileged_peer(adder, added)`
    pub fn add_privileged_peer(self, adder_id: &str, added_id: &str) -> Self {
        self.request(SessionRequest::AddPrivilegedPeer { adder_id: peer(adder_id), added_id: peer(added_id) })
    }

    /// `delete(deleter)`
    pub fn delete(self, deleter_id: Option<&str>) -> Self {
        self.request(SessionRequest::Delete { deleter_id: deleter_id.map(peer) })
    }

    /// `broadcast_data` with payload `data`.
    pub fn broadcast(self, sender_id: &str, raw_nonce: &str, data: &'static [u8], write_history: bool) -> Self {
        self.request(SessionRequest::BroadcastData {
            data: Bytes::from_static(data),
            sender_id: peer(sender_id),
            nonce: nonce(raw_nonce),
            write_history,
        })
    }

    /// `unicast_data` with payload `data`.
    pub fn unicast(
        self,
        sender_id: &str,
        receiver_id: &str,
        raw_nonce: &str,
        data: &'static [u8],
        write_history: bool,
        make_receiver_privileged: bool,
    ) -> Self {
        self.request(SessionRequest::UnicastData {
            data: Bytes::from_static(data),
            sender_id: peer(sender_id),
            receiver_id: peer(receiver_id),
            nonce: nonce(raw_nonce),
            write_history,
            make_receiver_privileged,
        })
    }

    /// `delete_data(deleter, sender, nonce)`
    pub fn delete_data(self, deleter_id: &str, data_sender_id: &str, data_nonce: &str) -> Self {
        self.request(SessionRequest::DeleteData {
            deleter_id: peer(deleter_id),
            data_sender_id: peer(data_sender_id),
            data_nonce: nonce(data_nonce),
        })
    }

    /// `get_history(reader, from)`
    pub fn get_history(self, reader_id: &str, from_timestamp: u64) -> Self {
        self.request(SessionRequest::GetHistory { reader_id: peer(reader_id), from_timestamp })
    }

    /// Advance virtual time.
    pub fn advance(self, by: Duration) -> Self {
        self.step(Step::Advance(by))
    }

    /// Subscriber of channel `index` disconnects.
    pub fn close_channel(self, index: usize) -> Self {
        self.step(Step::CloseChannel(index))
    }

    /// Unsubscribe the id that channel `index` was registered under.
    pub fn unsubscribe_channel(self, index: usize) -> Self {
        self.step(Step::UnsubscribeChannel(index))
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute every step, then invoke the oracle.
    ///
    /// # Errors
    ///
    /// Returns a description of the first failing step or oracle check.
    pub fn run(self) -> Result<(), String> {
        let Scenario { seed, key, config, steps } = self.scenario;
        let key = SessionKey::from_u32(key).map_err(|e| e.to_string())?;
        let mut world = World::new(key, config, SimEnv::detached(seed));

        for (index, step) in steps.into_iter().enumerate() {
            Self::execute(&mut world, step.clone())
                .map_err(|e| format!("step {index} ({step:?}) failed: {e}"))?;
        }

        (self.oracle)(&world)
    }

    fn execute(world: &mut World, step: Step) -> Result<(), String> {
        match step {
            Step::Request(request) => world.request(request).map_err(|e| e.to_string()),
            Step::Advance(by) => world.advance(by).map_err(|e| e.to_string()),
            Step::CloseChannel(index) => {
                let channel = Self::channel(world, index)?;
                world.close_channel(channel);
                Ok(())
            },
            Step::UnsubscribeChannel(index) => {
                let channel = Self::channel(world, index)?;
                let subscription_id = world
                    .inboxes()
                    .get(&channel)
                    .and_then(|inbox| inbox.messages.first())
                    .and_then(|message| match message {
                        tether_proto::ChannelMessage::SubscriptionId(id) => Some(*id),
                        _ => None,
                    })
                    .ok_or_else(|| format!("channel {index} never received its id"))?;
                world.request(SessionRequest::Unsubscribe { subscription_id }).map_err(|e| e.to_string())
            },
        }
    }

    fn channel(world: &World, index: usize) -> Result<ChannelId, String> {
        world
            .inboxes()
            .keys()
            .nth(index)
            .copied()
            .ok_or_else(|| format!("no channel {index}"))
    }
}
