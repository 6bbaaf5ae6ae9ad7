//! agentplane - in-process control plane for capability-routed agents
//!
//! Agents register their capabilities with a coordinator, receive task
//! assignments over an in-process message bus, report progress, completion
//! and failure, and keep their state durable across restarts through a
//! snapshot store.
//!
//! # Core Concepts
//!
//! - **At-most-once delivery**: a publish fans out to every subscriber of a
//!   recipient, each raced against a timeout, and reports what happened
//! - **One owner for state**: every agent state change goes through the
//!   [`state::StateManager`] actor, which persists it, records history and
//!   rebroadcasts it
//! - **Uniform task protocol**: every agent runs tasks the same way; only its
//!   [`agent::Role`] differs
//!
//! # Modules
//!
//! - [`bus`] - Message types and the pub/sub router
//! - [`domain`] - Agent state, tasks and capabilities
//! - [`state`] - StateManager actor and queries
//! - [`agent`] - Agent core, roles and the worker
//! - [`roles`] - Developer, analyzer, architect, tester and devops roles
//! - [`coordinator`] - Capability-based scheduler
//! - [`runtime`] - Wiring everything together from a [`config::Config`]
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod agent;
pub mod bus;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod roles;
pub mod runtime;
pub mod state;

pub use runtime::AgentPlane;
