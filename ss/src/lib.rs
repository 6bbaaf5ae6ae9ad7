//! StateStore - snapshot persistence for keyed state and bounded history
//!
//! A store keeps two collections:
//! - **States:** the latest record per owner id
//! - **History:** an append-only, newest-first log of updates, capped at a limit
//!
//! Both live in memory and are persisted as a single JSON snapshot.
//!
//! # Layout
//!
//! ```text
//! {storage-dir}/
//! └── state-store.json     # {"states": {...}, "history": [...], "version": 1}
//! ```
//!
//! # Example
//!
//! ```ignore
//! use statestore::{FileStateStore, StateStore, StoreOptions};
//!
//! let store: FileStateStore<MyState, MyUpdate> = FileStateStore::new(".agentplane", StoreOptions::default());
//! store.initialize().await?;
//! store.save_state("agent-1", state).await?;
//! let history = store.get_state_history("agent-1", Some(10)).await?;
//! store.shutdown().await?;
//! ```

mod error;
mod file;
mod memory;
mod snapshot;
mod store;

#[cfg(test)]
mod testing;

pub use error::{StoreError, StoreResult};
pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use snapshot::{Snapshot, StateMap};
pub use store::{HistoryRecord, Record, StateStore, StoreOptions};

/// Default maximum number of history records kept
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Default autosave period (5 seconds)
pub const DEFAULT_AUTOSAVE_INTERVAL_MS: u64 = 5000;

/// File name of the snapshot inside the storage directory
pub const SNAPSHOT_FILE_NAME: &str = "state-store.json";

/// Snapshot format version written by this crate
pub const SNAPSHOT_VERSION: u32 = 1;
