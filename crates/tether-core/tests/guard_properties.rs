//! Property-based tests for the replay guard window.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use proptest::prelude::*;
use tether_core::{Environment, GuardAlarm, GuardConfig, MemoryStorage, ReplayGuard, Timestamp};
use tether_proto::{NonceRecord, PeerId};

#[derive(Clone)]
struct Clock(Arc<AtomicU64>);

impl Clock {
    fn at_secs(secs: u64) -> Self {
        Self(Arc::new(AtomicU64::new(secs * 1000)))
    }

    fn advance_secs(&self, secs: u64) {
        self.0.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Environment for Clock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.0.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        self.0.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(0);
    }
}

const START: u64 = 1_700_000_000;
const WINDOW: u64 = 10 * 60;

// (advance seconds, id, timestamp offset back from now)
fn step_strategy() -> impl Strategy<Value = (u64, u64, u64)> {
    (0u64..400, 0u64..4, 0u64..3)
}

#[test]
fn prop_guard_matches_window_model() {
    proptest!(|(steps in prop::collection::vec(step_strategy(), 1..40))| {
        let clock = Clock::at_secs(START);
        let storage = MemoryStorage::new();
        let mut guard = ReplayGuard::new(PeerId::new("p").expect("valid peer"), GuardConfig::default());

        let mut model: HashSet<NonceRecord> = HashSet::new();

        for (advance, id, back) in steps {
            clock.advance_secs(advance);
            let now = clock.now().as_secs();
            let record = NonceRecord { id, timestamp: now - back };

            let cutoff = now - WINDOW;
            model.retain(|r| r.timestamp >= cutoff);
            let expected = model.contains(&record);

            let used = guard.check_nonce_is_used(record, &clock, &storage).expect("check failed");
            prop_assert_eq!(used, expected);
            model.insert(record);
        }
    });
}

#[test]
fn prop_alarm_reclaims_iff_window_empty() {
    proptest!(|(offsets in prop::collection::vec(0u64..1200, 1..10), wait in 0u64..1500)| {
        let clock = Clock::at_secs(START);
        let storage = MemoryStorage::new();
        let mut guard = ReplayGuard::new(PeerId::new("p").expect("valid peer"), GuardConfig::default());

        for (id, offset) in offsets.iter().enumerate() {
            let record = NonceRecord { id: id as u64, timestamp: START - offset };
            guard.check_nonce_is_used(record, &clock, &storage).expect("check failed");
        }

        clock.advance_secs(wait);
        let cutoff = START + wait - WINDOW;
        let survivors = offsets.iter().filter(|o| START - **o >= cutoff).count();

        let outcome = guard.alarm(&clock, &storage).expect("alarm failed");
        if survivors == 0 {
            prop_assert_eq!(outcome, GuardAlarm::Reclaimed);
            prop_assert!(storage.is_vacant(guard.scope()));
        } else {
            prop_assert_eq!(outcome, GuardAlarm::Rescheduled);
            prop_assert!(!storage.is_vacant(guard.scope()));
        }
    });
}
