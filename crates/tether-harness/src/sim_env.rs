//! Deterministic Environment implementation for simulation.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tether_core::{Environment, Timestamp};

/// Wall-clock reading of a freshly created [`SimEnv`]: 2023-11-14T22:13:20Z.
pub const SIM_EPOCH: Timestamp = Timestamp::from_secs(1_700_000_000);

/// Simulation environment with virtual time and a seeded RNG.
///
/// This implementation provides:
///
/// - **Virtual Time**: `now()` starts at [`SIM_EPOCH`]. An anchored env
///   (`with_seed`) follows the tokio clock, which Turmoil and paused tokio
///   tests advance instantly. A detached env (`detached`) only moves when
///   [`SimEnv::advance`] is called, for synchronous scenarios.
///
/// - **Clock Skew**: `advance()` moves the wall clock without moving the
///   tokio clock, modelling a jump in system time.
///
/// - **Seeded RNG**: `random_bytes()` uses ChaCha20Rng seeded with a fixed
///   value, ensuring reproducible runs.
///
/// # Usage
///
/// Create anchored envs inside the runtime (Turmoil host or tokio test)
/// whose clock they should follow.
#[derive(Clone)]
pub struct SimEnv {
    /// Shared across clones so the sequence continues rather than repeats
    rng: Arc<Mutex<ChaCha20Rng>>,
    anchor: Option<tokio::time::Instant>,
    skew_ms: Arc<AtomicU64>,
}

impl SimEnv {
    /// Anchored env with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Anchored env following the current tokio clock.
    pub fn with_seed(seed: u64) -> Self {
        Self::build(seed, Some(tokio::time::Instant::now()))
    }

    /// Env whose clock only moves through [`Self::advance`].
    pub fn detached(seed: u64) -> Self {
        Self::build(seed, None)
    }

    fn build(seed: u64, anchor: Option<tokio::time::Instant>) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            anchor,
            skew_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Move the wall clock forward by `by`. Shared by all clones.
    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.skew_ms.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Timestamp {
        let elapsed = self.anchor.map(|anchor| anchor.elapsed()).unwrap_or_default();
        SIM_EPOCH + elapsed + Duration::from_millis(self.skew_ms.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, dest: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(dest);
    }
}
