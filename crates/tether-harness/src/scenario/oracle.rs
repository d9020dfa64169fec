//! Oracle functions for scenario verification.
//!
//! Oracle functions run at the end of scenarios to verify global consistency.
//! They receive a snapshot of the entire world state and assert invariants.

use tether_core::SessionOutcome;

use crate::scenario::World;

/// Oracle function type.
///
/// Receives immutable reference to world state and returns:
/// - `Ok(())` if all invariants hold
/// - `Err(message)` if verification fails
pub type OracleFn = Box<dyn FnOnce(&World) -> Result<(), String>>;

/// Create an oracle that verifies whether the session exists.
pub fn session_exists(expected: bool) -> OracleFn {
    Box::new(move |world| {
        if world.exists() == expected {
            Ok(())
        } else {
            Err(format!("expected exists = {expected}, got {}", world.exists()))
        }
    })
}

/// Create an oracle that verifies the outcome of the last request.
pub fn last_outcome(expected: SessionOutcome) -> OracleFn {
    Box::new(move |world| match world.last_outcome() {
        Some(outcome) if *outcome == expected => Ok(()),
        other => Err(format!("expected last outcome {expected:?}, got {other:?}")),
    })
}

/// Create an oracle that verifies every channel of `subscriber` received
/// exactly `count` data messages.
pub fn data_received(subscriber: &'static str, count: usize) -> OracleFn {
    Box::new(move |world| {
        for inbox in world.inboxes_of(subscriber) {
            let received = inbox.data().len();
            if received != count {
                return Err(format!("{subscriber} received {received} messages, expected {count}"));
            }
        }
        Ok(())
    })
}

/// Create an oracle that verifies every channel opened so far was released.
pub fn all_channels_released() -> OracleFn {
    Box::new(|world| match world.inboxes().iter().find(|(_, inbox)| !inbox.released) {
        Some((channel, _)) => Err(format!("channel {} still open", channel.0)),
        None => Ok(()),
    })
}

/// Create an oracle that verifies no state remains in storage.
pub fn storage_reclaimed() -> OracleFn {
    Box::new(|world| {
        if world.storage().is_vacant(world.session().scope()) {
            Ok(())
        } else {
            Err(format!("storage still holds {:?}", world.storage().keys(world.session().scope())))
        }
    })
}

/// Combine multiple oracles into one.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world| {
        for oracle in oracles {
            oracle(world)?;
        }
        Ok(())
    })
}
