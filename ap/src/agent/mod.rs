//! Agents: shared core, role strategy, and the worker running the task protocol

mod config;
mod core;
mod role;
mod worker;

pub use config::{AgentConfig, NetworkConfig, ResourceConfig, SecurityConfig};
pub use self::core::{AgentCore, AgentEvent, OutgoingMessage};
pub use role::{Role, TaskError, ensure_supported, required, required_str};
pub use worker::Agent;
