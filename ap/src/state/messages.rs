//! State manager messages
//!
//! Commands and responses for the actor pattern.

use chrono::{DateTime, Utc};
use statestore::{StateMap, StoreError};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{AgentState, AgentStatePatch, AgentStatus, StateUpdate};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("StateManager is not initialized. Call initialize() first.")]
    NotInitialized,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Conjunctive filter over agent states; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateQuery {
    pub agent_id: Option<String>,
    pub status: Option<AgentStatus>,
    /// Inclusive lower bound on `lastUpdate`
    pub after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `lastUpdate`
    pub before: Option<DateTime<Utc>>,
}

impl StateQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn status(mut self, status: AgentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn after(mut self, at: DateTime<Utc>) -> Self {
        self.after = Some(at);
        self
    }

    pub fn before(mut self, at: DateTime<Utc>) -> Self {
        self.before = Some(at);
        self
    }

    pub fn matches(&self, state: &AgentState) -> bool {
        self.agent_id.as_ref().is_none_or(|id| *id == state.id)
            && self.status.is_none_or(|status| status == state.status)
            && self.after.is_none_or(|after| state.last_update >= after)
            && self.before.is_none_or(|before| state.last_update <= before)
    }
}

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    Update {
        agent_id: String,
        patch: AgentStatePatch,
        reply: oneshot::Sender<StateResponse<(AgentState, StateUpdate)>>,
    },
    Get {
        agent_id: String,
        reply: oneshot::Sender<StateResponse<Option<AgentState>>>,
    },
    GetAll {
        reply: oneshot::Sender<StateResponse<StateMap<AgentState>>>,
    },
    Query {
        query: StateQuery,
        reply: oneshot::Sender<StateResponse<Vec<AgentState>>>,
    },
    History {
        agent_id: String,
        limit: Option<usize>,
        reply: oneshot::Sender<StateResponse<Vec<StateUpdate>>>,
    },
    RecentHistory {
        limit: Option<usize>,
        reply: oneshot::Sender<StateResponse<Vec<StateUpdate>>>,
    },
    Clear {
        reply: oneshot::Sender<StateResponse<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<StateResponse<()>>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_empty_query_matches_everything() {
        assert!(StateQuery::new().matches(&AgentState::new("a")));
    }

    #[test]
    fn test_query_is_conjunctive_with_inclusive_bounds() {
        let mut state = AgentState::new("a");
        state.status = AgentStatus::Idle;
        let at = state.last_update;

        assert!(StateQuery::new().agent_id("a").status(AgentStatus::Idle).matches(&state));
        assert!(!StateQuery::new().agent_id("a").status(AgentStatus::Busy).matches(&state));
        assert!(!StateQuery::new().agent_id("b").matches(&state));

        assert!(StateQuery::new().after(at).before(at).matches(&state));
        assert!(!StateQuery::new().after(at + Duration::milliseconds(1)).matches(&state));
        assert!(!StateQuery::new().before(at - Duration::milliseconds(1)).matches(&state));
    }
}
