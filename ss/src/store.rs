//! StateStore trait and shared options

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::StoreResult;
use crate::snapshot::StateMap;
use crate::{DEFAULT_AUTOSAVE_INTERVAL_MS, DEFAULT_HISTORY_LIMIT};

/// Anything that can be kept in a store and written to a snapshot
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Record for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A history entry that belongs to one owner id
pub trait HistoryRecord: Record {
    /// Id of the state this update was applied to
    fn owner_id(&self) -> &str;
}

/// Persistence abstraction: latest state per id plus a bounded update history
///
/// Every operation other than `initialize` and `shutdown` fails with
/// [`StoreError::NotInitialized`](crate::StoreError::NotInitialized) until
/// `initialize` has completed.
#[async_trait]
pub trait StateStore: Send + Sync {
    type State: Record;
    type Update: HistoryRecord;

    /// Prepare the store (load persisted data, start background work). Idempotent.
    async fn initialize(&self) -> StoreResult<()>;

    /// Flush and release resources. No-op when not initialized.
    async fn shutdown(&self) -> StoreResult<()>;

    /// Replace the stored state for `id`
    async fn save_state(&self, id: &str, state: Self::State) -> StoreResult<()>;

    /// Get the stored state for `id`
    async fn get_state(&self, id: &str) -> StoreResult<Option<Self::State>>;

    /// Get every stored state keyed by id
    async fn get_all_states(&self) -> StoreResult<StateMap<Self::State>>;

    /// Prepend an update to the history, evicting the oldest past the limit
    async fn save_state_update(&self, update: Self::Update) -> StoreResult<()>;

    /// History for one id, newest first, optionally truncated to `limit`
    async fn get_state_history(&self, id: &str, limit: Option<usize>) -> StoreResult<Vec<Self::Update>>;

    /// History across all ids, newest first, optionally truncated to `limit`
    async fn get_recent_history(&self, limit: Option<usize>) -> StoreResult<Vec<Self::Update>>;

    /// Remove all states and history
    async fn clear(&self) -> StoreResult<()>;
}

/// Options shared by the store implementations
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Maximum number of history records kept (oldest evicted first)
    pub history_limit: usize,

    /// Periodic snapshot interval; zero disables autosave
    pub autosave_interval: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        debug!("StoreOptions::default: called");
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            autosave_interval: Duration::from_millis(DEFAULT_AUTOSAVE_INTERVAL_MS),
        }
    }
}

impl StoreOptions {
    /// Set the history limit
    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    /// Set the autosave interval
    pub fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    /// Disable periodic autosave (write-through persistence still applies)
    pub fn without_autosave(self) -> Self {
        self.with_autosave_interval(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = StoreOptions::default();
        assert_eq!(options.history_limit, 1000);
        assert_eq!(options.autosave_interval, Duration::from_millis(5000));
    }

    #[test]
    fn test_without_autosave() {
        let options = StoreOptions::default().with_history_limit(5).without_autosave();
        assert_eq!(options.history_limit, 5);
        assert!(options.autosave_interval.is_zero());
    }
}
