//! Domain types shared by the bus, the state manager and the agents
//!
//! - [`AgentState`] / [`AgentStatePatch`] / [`StateUpdate`] - agent state, deltas and history
//! - [`Task`] - unit of work routed by capability
//! - [`capability`] - the capability strings roles declare

mod agent;
pub mod capability;
mod task;

pub use agent::{AgentState, AgentStatePatch, AgentStatus, AgentType, StateUpdate};
pub use task::{Task, TaskStatus};

/// Generate a fresh, time-ordered unique id
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
