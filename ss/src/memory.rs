//! MemoryStateStore - non-durable store with the same semantics as the file store

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::snapshot::{Snapshot, StateMap};
use crate::store::{HistoryRecord, Record, StateStore, StoreOptions};

/// In-memory store, useful for tests and ephemeral runs
pub struct MemoryStateStore<S, U> {
    options: StoreOptions,
    data: Mutex<Snapshot<S, U>>,
    initialized: AtomicBool,
}

impl<S: Record, U: HistoryRecord> MemoryStateStore<S, U> {
    /// Create an empty store
    pub fn new(options: StoreOptions) -> Self {
        debug!(history_limit = options.history_limit, "MemoryStateStore::new: called");
        Self {
            options,
            data: Mutex::new(Snapshot::default()),
            initialized: AtomicBool::new(false),
        }
    }

    fn ensure_initialized(&self) -> StoreResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }
}

impl<S: Record, U: HistoryRecord> Default for MemoryStateStore<S, U> {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

#[async_trait]
impl<S: Record, U: HistoryRecord> StateStore for MemoryStateStore<S, U> {
    type State = S;
    type Update = U;

    async fn initialize(&self) -> StoreResult<()> {
        debug!("MemoryStateStore::initialize: called");
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> StoreResult<()> {
        debug!("MemoryStateStore::shutdown: called");
        self.initialized.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn save_state(&self, id: &str, state: S) -> StoreResult<()> {
        debug!(%id, "MemoryStateStore::save_state: called");
        self.ensure_initialized()?;
        self.data.lock().await.put_state(id, state);
        Ok(())
    }

    async fn get_state(&self, id: &str) -> StoreResult<Option<S>> {
        debug!(%id, "MemoryStateStore::get_state: called");
        self.ensure_initialized()?;
        Ok(self.data.lock().await.states.get(id).cloned())
    }

    async fn get_all_states(&self) -> StoreResult<StateMap<S>> {
        debug!("MemoryStateStore::get_all_states: called");
        self.ensure_initialized()?;
        Ok(self.data.lock().await.states.clone())
    }

    async fn save_state_update(&self, update: U) -> StoreResult<()> {
        debug!(owner_id = %update.owner_id(), "MemoryStateStore::save_state_update: called");
        self.ensure_initialized()?;
        self.data.lock().await.push_update(update, self.options.history_limit);
        Ok(())
    }

    async fn get_state_history(&self, id: &str, limit: Option<usize>) -> StoreResult<Vec<U>> {
        debug!(%id, ?limit, "MemoryStateStore::get_state_history: called");
        self.ensure_initialized()?;
        Ok(self.data.lock().await.history_for(id, limit))
    }

    async fn get_recent_history(&self, limit: Option<usize>) -> StoreResult<Vec<U>> {
        debug!(?limit, "MemoryStateStore::get_recent_history: called");
        self.ensure_initialized()?;
        Ok(self.data.lock().await.recent(limit))
    }

    async fn clear(&self) -> StoreResult<()> {
        debug!("MemoryStateStore::clear: called");
        self.ensure_initialized()?;
        self.data.lock().await.clear();
        Ok(())
    }
}
