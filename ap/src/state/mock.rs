//! Store doubles for tests

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use statestore::{MemoryStateStore, StateMap, StateStore, StoreError, StoreResult};

use crate::domain::{AgentState, StateUpdate};

/// In-memory store whose `save_state` starts failing after a number of successful calls
pub struct FlakyStore {
    inner: MemoryStateStore<AgentState, StateUpdate>,
    saves_left: AtomicUsize,
    pub failed_saves: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_after(saves: usize) -> Self {
        Self {
            inner: MemoryStateStore::default(),
            saves_left: AtomicUsize::new(saves),
            failed_saves: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    type State = AgentState;
    type Update = StateUpdate;

    async fn initialize(&self) -> StoreResult<()> {
        self.inner.initialize().await
    }

    async fn shutdown(&self) -> StoreResult<()> {
        self.inner.shutdown().await
    }

    async fn save_state(&self, id: &str, state: AgentState) -> StoreResult<()> {
        let allowed = self
            .saves_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            self.failed_saves.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Io {
                path: PathBuf::from("flaky-store"),
                source: std::io::Error::other("disk full"),
            });
        }
        self.inner.save_state(id, state).await
    }

    async fn get_state(&self, id: &str) -> StoreResult<Option<AgentState>> {
        self.inner.get_state(id).await
    }

    async fn get_all_states(&self) -> StoreResult<StateMap<AgentState>> {
        self.inner.get_all_states().await
    }

    async fn save_state_update(&self, update: StateUpdate) -> StoreResult<()> {
        self.inner.save_state_update(update).await
    }

    async fn get_state_history(&self, id: &str, limit: Option<usize>) -> StoreResult<Vec<StateUpdate>> {
        self.inner.get_state_history(id, limit).await
    }

    async fn get_recent_history(&self, limit: Option<usize>) -> StoreResult<Vec<StateUpdate>> {
        self.inner.get_recent_history(limit).await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.inner.clear().await
    }
}
