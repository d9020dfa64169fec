//! Scenario testing framework for deterministic session tests.
//!
//! This module provides a declarative API for writing scenario-based tests
//! that follow the Oracle Pattern. A scenario drives one session actor
//! through a list of steps on a detached virtual clock, executes the
//! channel actions it returns, fires its alarm when due, and always ends
//! with oracle verification.

mod builder;
pub mod oracle;
mod world;

pub use builder::{RunnableScenario, Scenario, Step};
pub use oracle::OracleFn;
pub use world::{Inbox, World};
