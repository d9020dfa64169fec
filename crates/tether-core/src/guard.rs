//! Replay guard actor logic.
//!
//! One guard per peer remembers the `(id, timestamp)` pairs of that peer's
//! recent signed requests and reports reuse. Pairs older than the nonce
//! window are forgotten; upstream freshness checks already reject requests
//! that old, so the guard never needs an unbounded log.
//!
//! # Invariants
//!
//! - A pair is reported as used iff an identical pair was recorded within
//!   the window. Lookups ignore records that have aged out even if the
//!   cleanup alarm has not fired yet.
//! - Every recording (re)arms the cleanup alarm; there is never more than
//!   one pending.
//! - When cleanup leaves nothing, every key of the scope is deleted and no
//!   alarm remains, so the peer's storage is reclaimable.

use tether_proto::{NonceRecord, PeerId};

use crate::{
    config::GuardConfig,
    env::Environment,
    error::ActorError,
    storage::{Scope, Storage, decode_value, encode_value, keys},
    time::Timestamp,
};

/// What a fired alarm left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAlarm {
    /// Records remain; the alarm was re-armed
    Rescheduled,
    /// Nothing remains; the scope was reclaimed
    Reclaimed,
}

/// One peer's replay guard.
pub struct ReplayGuard {
    peer: PeerId,
    scope: Scope,
    config: GuardConfig,
    records: Option<Vec<NonceRecord>>,
}

impl ReplayGuard {
    /// Create the guard for `peer`. State is read lazily on first use.
    pub fn new(peer: PeerId, config: GuardConfig) -> Self {
        let scope = Scope::Guard(peer.clone());
        Self { peer, scope, config, records: None }
    }

    /// Peer this guard protects.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Storage scope this guard owns.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Check whether `record` was already used, recording it if not.
    ///
    /// Returns true for a replay, in which case nothing is written.
    ///
    /// # Errors
    ///
    /// Returns `ActorError::Storage` if state cannot be read or written; the
    /// pair is then not recorded.
    pub fn check_nonce_is_used<E, S>(
        &mut self,
        record: NonceRecord,
        env: &E,
        storage: &S,
    ) -> Result<bool, ActorError>
    where
        E: Environment,
        S: Storage,
    {
        let cutoff = self.cutoff(env.now());
        let mut records = self.load(storage)?.to_vec();
        records.retain(|r| r.timestamp >= cutoff);

        if records.contains(&record) {
            tracing::debug!(peer = %self.peer, id = record.id, timestamp = record.timestamp, "nonce replayed");
            return Ok(true);
        }

        records.push(record);
        storage.put(
            &self.scope,
            vec![(keys::NONCE_LIST, encode_value(keys::NONCE_LIST, &records)?)],
            Some(env.now() + self.config.cleanup_delay),
        )?;

        tracing::debug!(
            peer = %self.peer,
            id = record.id,
            timestamp = record.timestamp,
            remembered = records.len(),
            "nonce recorded"
        );

        self.records = Some(records);
        Ok(false)
    }

    /// Handle the cleanup alarm firing.
    ///
    /// # Errors
    ///
    /// Returns `ActorError::Storage` if the pruned set cannot be persisted.
    pub fn alarm<E, S>(&mut self, env: &E, storage: &S) -> Result<GuardAlarm, ActorError>
    where
        E: Environment,
        S: Storage,
    {
        let cutoff = self.cutoff(env.now());
        let mut records = self.load(storage)?.to_vec();
        records.retain(|r| r.timestamp >= cutoff);

        if records.is_empty() {
            storage.delete_all(&self.scope)?;
            self.records = Some(records);

            tracing::info!(peer = %self.peer, "replay guard reclaimed");
            return Ok(GuardAlarm::Reclaimed);
        }

        storage.put(
            &self.scope,
            vec![(keys::NONCE_LIST, encode_value(keys::NONCE_LIST, &records)?)],
            Some(env.now() + self.config.cleanup_delay),
        )?;

        tracing::debug!(peer = %self.peer, remembered = records.len(), "replay guard pruned");
        self.records = Some(records);
        Ok(GuardAlarm::Rescheduled)
    }

    /// Oldest timestamp (seconds) still inside the window at `now`.
    fn cutoff(&self, now: Timestamp) -> u64 {
        now.as_secs().saturating_sub(self.config.nonce_window.as_secs())
    }

    fn load<S: Storage>(&mut self, storage: &S) -> Result<&[NonceRecord], ActorError> {
        if self.records.is_none() {
            let value = storage.get(&self.scope, &[keys::NONCE_LIST])?.into_iter().next().flatten();
            self.records = Some(decode_value(keys::NONCE_LIST, value)?.unwrap_or_default());
        }
        Ok(self.records.as_deref().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{env::testing::ManualEnv, storage::MemoryStorage};

    const START: u64 = 1_000;

    struct Fixture {
        env: ManualEnv,
        storage: MemoryStorage,
        guard: ReplayGuard,
    }

    impl Fixture {
        fn new() -> Self {
            let peer = PeerId::new("p1").expect("valid peer id");
            Self {
                env: ManualEnv::at_secs(START),
                storage: MemoryStorage::new(),
                guard: ReplayGuard::new(peer, GuardConfig::default()),
            }
        }

        fn check(&mut self, id: u64, timestamp: u64) -> bool {
            self.guard
                .check_nonce_is_used(NonceRecord { id, timestamp }, &self.env, &self.storage)
                .expect("check failed")
        }

        fn fire(&mut self) -> GuardAlarm {
            self.guard.alarm(&self.env, &self.storage).expect("alarm failed")
        }
    }

    #[test]
    fn test_first_use_then_replay() {
        let mut f = Fixture::new();

        assert!(!f.check(5, START));
        assert!(f.check(5, START));
        assert!(!f.check(5, START + 1));
        assert!(!f.check(6, START));
    }

    #[test]
    fn test_pair_expires_after_window() {
        let mut f = Fixture::new();
        assert!(!f.check(5, START));

        f.env.advance(Duration::from_secs(10 * 60 + 1));
        assert!(!f.check(5, START));
        assert!(f.check(5, START));
    }

    #[test]
    fn test_replay_writes_nothing() {
        let mut f = Fixture::new();
        assert!(!f.check(5, START));
        let armed = f.storage.alarm(f.guard.scope()).expect("alarm read");

        f.env.advance(Duration::from_secs(30));
        f.storage.fail_writes(true);
        assert!(f.check(5, START));
        f.storage.fail_writes(false);

        assert_eq!(f.storage.alarm(f.guard.scope()).expect("alarm read"), armed);
    }

    #[test]
    fn test_recording_rearms_cleanup() {
        let mut f = Fixture::new();
        f.check(1, START);
        f.env.advance(Duration::from_secs(120));
        f.check(2, START + 120);

        let alarm = f.storage.alarm(f.guard.scope()).expect("alarm read");
        assert_eq!(alarm, Some(f.env.now() + Duration::from_secs(11 * 60)));
    }

    #[test]
    fn test_alarm_reclaims_when_everything_expired() {
        let mut f = Fixture::new();
        f.check(1, START);

        f.env.advance(Duration::from_secs(11 * 60));
        assert_eq!(f.fire(), GuardAlarm::Reclaimed);
        assert!(f.storage.is_vacant(f.guard.scope()));
    }

    #[test]
    fn test_alarm_keeps_recent_records() {
        let mut f = Fixture::new();
        f.check(1, START);
        f.env.advance(Duration::from_secs(5 * 60));
        f.check(2, START + 5 * 60);

        f.env.advance(Duration::from_secs(6 * 60));
        assert_eq!(f.fire(), GuardAlarm::Rescheduled);
        assert_eq!(
            f.storage.alarm(f.guard.scope()).expect("alarm read"),
            Some(f.env.now() + Duration::from_secs(11 * 60))
        );

        assert!(f.check(2, START + 5 * 60));
        assert!(!f.check(1, START));
    }

    #[test]
    fn test_state_reloads_from_storage() {
        let mut f = Fixture::new();
        f.check(9, START);

        let mut fresh = ReplayGuard::new(f.guard.peer().clone(), GuardConfig::default());
        let used = fresh
            .check_nonce_is_used(NonceRecord { id: 9, timestamp: START }, &f.env, &f.storage)
            .expect("check failed");
        assert!(used);
    }

    #[test]
    fn test_failed_alarm_write_records_nothing() {
        let mut f = Fixture::new();

        f.storage.fail_alarm_writes(true);
        let result = f.guard.check_nonce_is_used(NonceRecord { id: 3, timestamp: START }, &f.env, &f.storage);
        assert!(matches!(result, Err(ActorError::Storage(_))));
        f.storage.fail_alarm_writes(false);

        assert!(f.storage.is_vacant(f.guard.scope()));
        assert!(!f.check(3, START), "pair must not count as used after a failed write");
        assert_eq!(
            f.storage.alarm(f.guard.scope()).expect("alarm read"),
            Some(f.env.now() + Duration::from_secs(11 * 60))
        );
    }

    #[test]
    fn test_failed_reschedule_keeps_previous_records() {
        let mut f = Fixture::new();
        f.check(1, START);
        f.env.advance(Duration::from_secs(5 * 60));
        f.check(2, START + 5 * 60);
        f.env.advance(Duration::from_secs(6 * 60));

        f.storage.fail_alarm_writes(true);
        assert!(matches!(f.guard.alarm(&f.env, &f.storage), Err(ActorError::Storage(_))));
        f.storage.fail_alarm_writes(false);

        let mut fresh = ReplayGuard::new(f.guard.peer().clone(), GuardConfig::default());
        let used = fresh
            .check_nonce_is_used(NonceRecord { id: 2, timestamp: START + 5 * 60 }, &f.env, &f.storage)
            .expect("check failed");
        assert!(used);
        assert_eq!(f.fire(), GuardAlarm::Rescheduled);
    }
}
