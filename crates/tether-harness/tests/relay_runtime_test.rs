//! Relay runtime tests on the simulation environment.
//!
//! Run on a paused tokio clock with an anchored [`SimEnv`], so alarms that
//! lie minutes ahead fire as soon as every task is idle.

use std::time::Duration;

use bytes::Bytes;
use tether_core::{Environment, MemoryStorage, Scope};
use tether_harness::{SIM_EPOCH, SimEnv};
use tether_proto::{ChannelMessage, Nonce, NonceRecord, PeerId};
use tether_server::{Relay, RelayConfig};

const MINUTE: Duration = Duration::from_secs(60);

fn relay(seed: u64, storage: MemoryStorage) -> Relay<SimEnv, MemoryStorage> {
    Relay::new(RelayConfig::default(), SimEnv::with_seed(seed), storage).expect("valid config")
}

fn peer(id: &str) -> PeerId {
    PeerId::new(id).expect("valid peer id")
}

/// Let spawned tasks run to their next await point.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn sim_clock_starts_at_epoch() {
    let env = SimEnv::with_seed(0);
    assert_eq!(env.now(), SIM_EPOCH);

    tokio::time::sleep(MINUTE).await;
    assert_eq!(env.now(), SIM_EPOCH + MINUTE);
}

#[tokio::test(start_paused = true)]
async fn guard_reclaims_and_respawns() {
    let relay = relay(1, MemoryStorage::new());
    let alice = peer("alice");
    let record = NonceRecord { id: 42, timestamp: SIM_EPOCH.as_secs() };

    assert!(!relay.check_nonce_is_used(&alice, record).await.expect("check failed"));
    assert!(relay.check_nonce_is_used(&alice, record).await.expect("check failed"));
    assert_eq!(relay.live_guard_count(), 1);

    tokio::time::sleep(MINUTE * 11 + Duration::from_secs(1)).await;
    settle().await;

    assert_eq!(relay.live_guard_count(), 0, "guard should exit after reclaiming");
    assert!(relay.storage().is_vacant(&Scope::Guard(alice.clone())));

    // Aged out of the window, so the pair reads as fresh again
    assert!(!relay.check_nonce_is_used(&alice, record).await.expect("check failed"));
    assert_eq!(relay.live_guard_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn guard_keeps_future_dated_pairs_past_first_cleanup() {
    let relay = relay(2, MemoryStorage::new());
    let bob = peer("bob");
    let ahead = NonceRecord { id: 7, timestamp: (SIM_EPOCH + MINUTE * 5).as_secs() };

    assert!(!relay.check_nonce_is_used(&bob, ahead).await.expect("check failed"));

    tokio::time::sleep(MINUTE * 11 + Duration::from_secs(1)).await;
    settle().await;

    assert_eq!(relay.live_guard_count(), 1, "pair is still inside the window");
    assert!(relay.check_nonce_is_used(&bob, ahead).await.expect("check failed"));

    tokio::time::sleep(MINUTE * 11).await;
    settle().await;

    assert_eq!(relay.live_guard_count(), 0);
    assert!(relay.storage().is_vacant(&Scope::Guard(bob)));
}

#[tokio::test(start_paused = true)]
async fn guards_of_different_peers_are_independent() {
    let relay = relay(3, MemoryStorage::new());
    let record = NonceRecord { id: 1, timestamp: SIM_EPOCH.as_secs() };

    assert!(!relay.check_nonce_is_used(&peer("a"), record).await.expect("check failed"));
    assert!(!relay.check_nonce_is_used(&peer("b"), record).await.expect("check failed"));
    assert_eq!(relay.live_guard_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn idle_session_expires_and_closes_streams() {
    let relay = relay(4, MemoryStorage::new());
    let key = relay.create_session(peer("p1")).await.expect("create failed");
    let session = relay.session(key);

    let mut stream = session.subscribe(peer("p1")).await.expect("subscribe failed").into_stream().expect("upgrade");
    assert!(matches!(stream.recv().await, Some(ChannelMessage::SubscriptionId(_))));

    tokio::time::sleep(MINUTE * 20 + Duration::from_secs(1)).await;

    assert_eq!(stream.recv().await, Some(ChannelMessage::Close));
    assert_eq!(stream.recv().await, None);
    assert!(!session.check_exists().await.expect("check failed"));
    assert!(relay.storage().is_vacant(&Scope::Session(key)));
}

#[tokio::test(start_paused = true)]
async fn restarted_relay_rehydrates_from_storage() {
    let storage = MemoryStorage::new();
    let first = relay(5, storage.clone());

    let key = first.create_session(peer("p1")).await.expect("create failed");
    let nonce = Nonce::parse("n_1700000000").expect("valid nonce");
    assert!(
        first
            .session(key)
            .broadcast_data(Bytes::from_static(b"kept"), peer("p1"), nonce, true)
            .await
            .expect("broadcast failed")
    );

    let second = relay(6, storage);
    let session = second.session(key);
    assert!(session.check_exists().await.expect("check failed"));

    let history = session.get_history(peer("p1"), 0).await.expect("history failed");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].data, Bytes::from_static(b"kept"));
}
