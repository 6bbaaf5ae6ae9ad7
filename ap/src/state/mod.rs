//! State management: the actor-backed StateManager and its messages

mod manager;
mod messages;

#[cfg(test)]
pub mod mock;

pub use manager::{AgentStore, StateEvent, StateManager, StateManagerOptions, StateObserver};
pub use messages::{StateCommand, StateError, StateQuery, StateResponse};
