//! Tether actor core logic
//!
//! This crate contains the pure state machines of the tether relay: the
//! session actor and the per-peer replay guard. It is completely decoupled
//! from I/O, enabling deterministic testing.
//!
//! # Architecture: "The Hollow Shell"
//!
//! Actor logic is strictly separated from the runtime:
//!
//! ```text
//!       ┌───────────────────────────────┐
//!       │ tether-core                   │
//!       │ - Session state machine       │
//!       │ - Replay guard state machine  │
//!       │ - Storage + alarm contract    │
//!       └───────────────────────────────┘
//!          ↓                         ↓
//! ┌──────────────────┐   ┌──────────────────────┐
//! │ tether-harness   │   │ tether-server        │
//! │ - Virtual time   │   │ - Tokio actor tasks  │
//! │ - Seeded RNG     │   │ - System clock       │
//! │ - Scenarios      │   │ - Subscription chans │
//! └──────────────────┘   └──────────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in Core: never call `tokio::spawn`, `SystemTime::now()`, or
//!   `rand::thread_rng()` directly
//! - Environment Trait: clock and randomness go through [`Environment`]
//! - Storage Trait: persistence and the single wake alarm go through
//!   [`Storage`]
//! - Actions: channel traffic is returned as [`SessionAction`]s for the
//!   driver to execute
//!
//! # Modules
//!
//! - [`session`]: Session actor (membership, fan-out, history, expiry)
//! - [`guard`]: Replay guard actor (nonce window)
//! - [`storage`]: Scoped storage contract and in-memory backend
//! - [`env`]: Environment abstraction (time, RNG)
//! - [`config`]: Timing configuration
//! - [`error`]: Actor error types

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod env;
pub mod error;
pub mod guard;
pub mod session;
pub mod storage;
pub mod time;

pub use config::{GuardConfig, SessionConfig};
pub use env::Environment;
pub use error::ActorError;
pub use guard::{GuardAlarm, ReplayGuard};
pub use session::{ChannelId, Handled, Session, SessionAction, SessionOutcome, Subscription};
pub use storage::{MemoryStorage, Scope, Storage, StorageError};
pub use time::Timestamp;
