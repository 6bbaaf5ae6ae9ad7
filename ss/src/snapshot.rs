//! In-memory snapshot shared by the store implementations

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::SNAPSHOT_VERSION;
use crate::error::{StoreError, StoreResult};
use crate::store::{HistoryRecord, Record};

/// States keyed by owner id
pub type StateMap<S> = BTreeMap<String, S>;

/// The full persisted image: all states plus the bounded history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot<S, U> {
    pub states: StateMap<S>,
    /// Newest first
    pub history: VecDeque<U>,
    pub version: u32,
}

impl<S, U> Default for Snapshot<S, U> {
    fn default() -> Self {
        Self {
            states: BTreeMap::new(),
            history: VecDeque::new(),
            version: SNAPSHOT_VERSION,
        }
    }
}

impl<S: Record, U: HistoryRecord> Snapshot<S, U> {
    /// Replace the state for `id`
    pub fn put_state(&mut self, id: &str, state: S) {
        debug!(%id, "Snapshot::put_state: called");
        self.states.insert(id.to_string(), state);
    }

    /// Prepend an update, evicting the oldest entries beyond `limit`
    pub fn push_update(&mut self, update: U, limit: usize) {
        debug!(owner_id = %update.owner_id(), limit, "Snapshot::push_update: called");
        self.history.push_front(update);
        if self.history.len() > limit {
            let evicted = self.history.len() - limit;
            debug!(evicted, "Snapshot::push_update: evicting oldest entries");
            self.history.truncate(limit);
        }
    }

    /// History for one owner, newest first
    pub fn history_for(&self, id: &str, limit: Option<usize>) -> Vec<U> {
        let matching = self.history.iter().filter(|u| u.owner_id() == id);
        match limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }

    /// History across all owners, newest first
    pub fn recent(&self, limit: Option<usize>) -> Vec<U> {
        let limit = limit.unwrap_or(self.history.len());
        self.history.iter().take(limit).cloned().collect()
    }

    /// Drop all states and history
    pub fn clear(&mut self) {
        debug!(states = self.states.len(), history = self.history.len(), "Snapshot::clear: called");
        self.states.clear();
        self.history.clear();
    }

    /// Serialize as pretty JSON
    pub fn to_json(&self) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse a snapshot, rejecting versions this crate does not write
    pub fn from_json(bytes: &[u8], history_limit: usize) -> StoreResult<Self> {
        let mut snapshot: Self = serde_json::from_slice(bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        // A snapshot written with a larger limit is trimmed to the current one
        snapshot.history.truncate(history_limit);
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Change, Counter, change};
    use proptest::prelude::*;

    type TestSnapshot = Snapshot<Counter, Change>;

    #[test]
    fn test_push_update_newest_first() {
        let mut snapshot = TestSnapshot::default();
        snapshot.push_update(change("a", 1), 10);
        snapshot.push_update(change("a", 2), 10);

        let history = snapshot.history_for("a", None);
        assert_eq!(history[0].value, 2);
        assert_eq!(history[1].value, 1);
    }

    #[test]
    fn test_history_for_filters_and_limits() {
        let mut snapshot = TestSnapshot::default();
        for value in 0..5 {
            snapshot.push_update(change("a", value), 100);
            snapshot.push_update(change("b", value), 100);
        }

        let a = snapshot.history_for("a", Some(3));
        assert_eq!(a.len(), 3);
        assert!(a.iter().all(|u| u.owner == "a"));
        assert_eq!(a[0].value, 4);

        assert_eq!(snapshot.recent(Some(4)).len(), 4);
        assert_eq!(snapshot.recent(None).len(), 10);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let json = br#"{"states": {}, "history": [], "version": 7}"#;
        let result = TestSnapshot::from_json(json, 10);
        assert!(matches!(
            result,
            Err(StoreError::UnsupportedVersion { found: 7, expected: 1 })
        ));
    }

    #[test]
    fn test_from_json_trims_history_to_limit() {
        let mut snapshot = TestSnapshot::default();
        for value in 0..10 {
            snapshot.push_update(change("a", value), 100);
        }
        let bytes = snapshot.to_json().unwrap();

        let loaded = TestSnapshot::from_json(&bytes, 3).unwrap();
        assert_eq!(loaded.history.len(), 3);
        assert_eq!(loaded.history[0].value, 9);
    }

    proptest! {
        #[test]
        fn prop_history_never_exceeds_limit(limit in 1usize..50, pushes in 0u32..200) {
            let mut snapshot = TestSnapshot::default();
            for value in 0..pushes {
                snapshot.push_update(change("a", value), limit);
                prop_assert!(snapshot.history.len() <= limit);
            }
            if pushes > 0 {
                prop_assert_eq!(snapshot.history[0].value, pushes - 1);
                // Oldest surviving entry is exactly `limit` pushes back
                let expected_oldest = pushes.saturating_sub(limit as u32);
                prop_assert_eq!(snapshot.history.back().map(|u| u.value), Some(expected_oldest));
            }
        }
    }
}
