//! Task scheduling across registered agents

mod core;
mod failure;

pub use self::core::CoordinatorAgent;
pub use failure::{FailureHandler, LogFailures};
