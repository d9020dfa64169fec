//! Deterministic simulation harness for the tether relay.
//!
//! This crate provides a seeded, virtual-time `Environment` and a scenario
//! framework for reproducible tests of the session and replay guard actors,
//! both directly against the core state machines and through the tokio
//! runtime under Turmoil.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scenario;
pub mod sim_env;

pub use sim_env::{SIM_EPOCH, SimEnv};
