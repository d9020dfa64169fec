//! # Tether Server: Actor Runtime
//!
//! Hosts the session and replay guard state machines of `tether-core` as
//! tokio tasks, one per session key or peer id.
//!
//! ```text
//! dispatcher ──bytes──> Relay ──mpsc──> SessionTask ── Session (core)
//!                         │                 │
//!                         │                 └──mpsc──> SubscriptionStream
//!                         └─────mpsc──> GuardTask ──── ReplayGuard (core)
//! ```
//!
//! Each task handles its mailbox one message at a time, so the core state
//! machines need no locking. After every step the task re-reads the
//! persisted alarm and arms a single timer for it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod actor;
pub mod channel;
pub mod config;
pub mod env;
pub mod error;
pub mod handle;
pub mod relay;
pub mod telemetry;

pub use channel::{SUBSCRIPTION_ID_HEADER, SessionReply, SubscriptionStream};
pub use config::RelayConfig;
pub use env::SystemEnv;
pub use error::RelayError;
pub use handle::{GuardHandle, SessionHandle};
pub use relay::Relay;
