//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples actor logic from system resources
//! (wall clock, randomness, timers). This enables:
//!
//! - Deterministic Simulation: the harness provides a virtual clock and a
//!   seeded RNG, so an expiry bug reproduces exactly.
//!
//! - Production Runtime: the server uses the system clock and the OS entropy
//!   pool without any change to the actor logic.
//!
//! # Design Philosophy: "The Hollow Shell"
//!
//! State machines in `tether-core` are pure logic. They:
//!
//! - MUST NOT call `SystemTime::now()` or `tokio::time::sleep()`
//! - MUST NOT use `rand::thread_rng()` or system entropy directly
//! - MUST accept an `Environment` parameter for all side effects
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards within one run
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::Duration;

use crate::time::Timestamp;

/// Abstract environment providing wall-clock time, randomness, and sleeping.
///
/// Wall-clock time (rather than a monotonic `Instant`) is required because
/// nonce timestamps are UNIX seconds and wake deadlines are persisted across
/// actor restarts.
///
/// # Implementations
///
/// - Simulation (`tether-harness::SimEnv`): virtual time that can be advanced
///   instantly, seeded RNG for reproducibility.
///
/// - Production (`tether-server::SystemEnv`): system clock, OS RNG.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// 1. RNG quality: `random_bytes()` uses cryptographically secure entropy in
///    production. Subscription ids are seeded from it and must not be
///    predictable.
/// 2. Minimal panics: Methods are infallible except in exceptional
///    circumstances (e.g., OS entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current wall-clock time.
    fn now(&self) -> Timestamp;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code (the actor runtime) sleeps. Actor logic persists a
    /// wake deadline instead.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Security
    ///
    /// Production implementations MUST use the OS entropy pool.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u32`, uniform over the full range.
    fn random_u32(&self) -> u32 {
        let mut bytes = [0u8; 4];
        self.random_bytes(&mut bytes);
        u32::from_be_bytes(bytes)
    }

    /// Generates a random `u64`.
    ///
    /// Used for session keys.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
