//! FileStateStore - snapshot persistence with write-through and periodic autosave
//!
//! All disk writes go through one writer task fed by a FIFO queue. Snapshots
//! are serialized and enqueued while the data lock is held, so they reach the
//! disk in the same order as the mutations that produced them. Each write goes
//! to a temporary file that is then renamed over the snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::SNAPSHOT_FILE_NAME;
use crate::error::{StoreError, StoreResult};
use crate::snapshot::{Snapshot, StateMap};
use crate::store::{HistoryRecord, Record, StateStore, StoreOptions};

/// A serialized snapshot waiting to be written
struct WriteRequest {
    bytes: Vec<u8>,
    /// Write-through callers wait for the outcome; autosave does not
    ack: Option<oneshot::Sender<StoreResult<()>>>,
}

/// Background tasks owned by an initialized store
struct Running {
    writer_tx: mpsc::UnboundedSender<WriteRequest>,
    writer: JoinHandle<()>,
    autosave: Option<JoinHandle<()>>,
}

/// Store backed by a single JSON snapshot file
pub struct FileStateStore<S, U> {
    path: PathBuf,
    options: StoreOptions,
    data: Arc<Mutex<Snapshot<S, U>>>,
    running: Mutex<Option<Running>>,
}

impl<S: Record, U: HistoryRecord> FileStateStore<S, U> {
    /// Create a store that keeps its snapshot in `storage_dir`
    ///
    /// Nothing touches the disk until [`StateStore::initialize`] is called.
    pub fn new(storage_dir: impl AsRef<Path>, options: StoreOptions) -> Self {
        let path = storage_dir.as_ref().join(SNAPSHOT_FILE_NAME);
        debug!(path = %path.display(), "FileStateStore::new: called");
        Self {
            path,
            options,
            data: Arc::new(Mutex::new(Snapshot::default())),
            running: Mutex::new(None),
        }
    }

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot on disk without initializing the store
    ///
    /// Touches nothing: no directory is created and nothing is written. A
    /// missing file reads as an empty snapshot.
    pub async fn read_snapshot(&self) -> StoreResult<Snapshot<S, U>> {
        debug!(path = %self.path.display(), "FileStateStore::read_snapshot: called");
        Ok(load_snapshot(&self.path, self.options.history_limit)
            .await?
            .unwrap_or_default())
    }

    /// Whether `initialize` has completed (and `shutdown` has not)
    pub async fn is_initialized(&self) -> bool {
        self.running.lock().await.is_some()
    }

    async fn writer(&self) -> StoreResult<mpsc::UnboundedSender<WriteRequest>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.writer_tx.clone())
            .ok_or(StoreError::NotInitialized)
    }

    async fn ensure_initialized(&self) -> StoreResult<()> {
        self.writer().await.map(|_| ())
    }

    /// Apply a mutation and wait for the resulting snapshot to be written
    async fn mutate<F>(&self, apply: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Snapshot<S, U>) + Send,
    {
        let writer_tx = self.writer().await?;
        let ack = {
            let mut data = self.data.lock().await;
            apply(&mut data);
            enqueue(&writer_tx, &data)?
        };
        wait_for_write(ack).await
    }
}

fn enqueue<S: Record, U: HistoryRecord>(
    writer_tx: &mpsc::UnboundedSender<WriteRequest>,
    data: &Snapshot<S, U>,
) -> StoreResult<oneshot::Receiver<StoreResult<()>>> {
    let bytes = data.to_json()?;
    let (ack_tx, ack_rx) = oneshot::channel();
    writer_tx
        .send(WriteRequest {
            bytes,
            ack: Some(ack_tx),
        })
        .map_err(|_| StoreError::WriterClosed)?;
    Ok(ack_rx)
}

async fn wait_for_write(ack: oneshot::Receiver<StoreResult<()>>) -> StoreResult<()> {
    ack.await.map_err(|_| StoreError::WriterClosed)?
}

async fn load_snapshot<S: Record, U: HistoryRecord>(
    path: &Path,
    history_limit: usize,
) -> StoreResult<Option<Snapshot<S, U>>> {
    debug!(path = %path.display(), "load_snapshot: called");
    match tokio::fs::read(path).await {
        Ok(bytes) => Snapshot::from_json(&bytes, history_limit).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("load_snapshot: no snapshot file, starting empty");
            Ok(None)
        }
        Err(e) => Err(StoreError::io(path, e)),
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

/// The single writer: drains the queue in order
async fn writer_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<WriteRequest>) {
    debug!(path = %path.display(), "writer_loop: started");
    while let Some(request) = rx.recv().await {
        let result = write_atomic(&path, &request.bytes).await;
        match request.ack {
            Some(ack) => {
                if let Err(e) = &result {
                    error!(error = %e, "Snapshot write failed");
                }
                let _ = ack.send(result);
            }
            None => {
                if let Err(e) = result {
                    warn!(error = %e, "Auto-save failed");
                }
            }
        }
    }
    debug!("writer_loop: stopped");
}

async fn autosave_loop<S: Record, U: HistoryRecord>(
    data: Arc<Mutex<Snapshot<S, U>>>,
    writer_tx: mpsc::UnboundedSender<WriteRequest>,
    interval: Duration,
) {
    debug!(?interval, "autosave_loop: started");
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let snapshot = data.lock().await;
        match snapshot.to_json() {
            Ok(bytes) => {
                if writer_tx.send(WriteRequest { bytes, ack: None }).is_err() {
                    debug!("autosave_loop: writer closed, stopping");
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Auto-save failed"),
        }
    }
}

#[async_trait]
impl<S: Record, U: HistoryRecord> StateStore for FileStateStore<S, U> {
    type State = S;
    type Update = U;

    async fn initialize(&self) -> StoreResult<()> {
        debug!(path = %self.path.display(), "FileStateStore::initialize: called");
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("FileStateStore::initialize: already initialized");
            return Ok(());
        }

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::io(dir, e))?;
        }

        let loaded = load_snapshot::<S, U>(&self.path, self.options.history_limit).await?;
        let loaded_existing = loaded.is_some();
        *self.data.lock().await = loaded.unwrap_or_default();

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(writer_loop(self.path.clone(), writer_rx));

        let autosave = if self.options.autosave_interval.is_zero() {
            debug!("FileStateStore::initialize: autosave disabled");
            None
        } else {
            Some(tokio::spawn(autosave_loop(
                Arc::clone(&self.data),
                writer_tx.clone(),
                self.options.autosave_interval,
            )))
        };

        *running = Some(Running {
            writer_tx,
            writer,
            autosave,
        });

        info!(path = %self.path.display(), loaded_existing, "State store initialized");
        Ok(())
    }

    async fn shutdown(&self) -> StoreResult<()> {
        debug!("FileStateStore::shutdown: called");
        let Some(running) = self.running.lock().await.take() else {
            debug!("FileStateStore::shutdown: not initialized");
            return Ok(());
        };

        if let Some(autosave) = running.autosave {
            autosave.abort();
        }

        let ack = {
            let data = self.data.lock().await;
            enqueue(&running.writer_tx, &data)
        };
        let result = match ack {
            Ok(ack) => wait_for_write(ack).await,
            Err(e) => Err(e),
        };

        // Closing the queue lets the writer finish whatever is still pending
        drop(running.writer_tx);
        if let Err(e) = running.writer.await {
            warn!(error = %e, "Snapshot writer task ended abnormally");
        }

        info!(path = %self.path.display(), "State store shut down");
        result
    }

    async fn save_state(&self, id: &str, state: S) -> StoreResult<()> {
        debug!(%id, "FileStateStore::save_state: called");
        self.mutate(|data| data.put_state(id, state)).await
    }

    async fn get_state(&self, id: &str) -> StoreResult<Option<S>> {
        debug!(%id, "FileStateStore::get_state: called");
        self.ensure_initialized().await?;
        Ok(self.data.lock().await.states.get(id).cloned())
    }

    async fn get_all_states(&self) -> StoreResult<StateMap<S>> {
        debug!("FileStateStore::get_all_states: called");
        self.ensure_initialized().await?;
        Ok(self.data.lock().await.states.clone())
    }

    async fn save_state_update(&self, update: U) -> StoreResult<()> {
        debug!(owner_id = %update.owner_id(), "FileStateStore::save_state_update: called");
        let limit = self.options.history_limit;
        self.mutate(|data| data.push_update(update, limit)).await
    }

    async fn get_state_history(&self, id: &str, limit: Option<usize>) -> StoreResult<Vec<U>> {
        debug!(%id, ?limit, "FileStateStore::get_state_history: called");
        self.ensure_initialized().await?;
        Ok(self.data.lock().await.history_for(id, limit))
    }

    async fn get_recent_history(&self, limit: Option<usize>) -> StoreResult<Vec<U>> {
        debug!(?limit, "FileStateStore::get_recent_history: called");
        self.ensure_initialized().await?;
        Ok(self.data.lock().await.recent(limit))
    }

    async fn clear(&self) -> StoreResult<()> {
        debug!("FileStateStore::clear: called");
        self.mutate(|data| data.clear()).await
    }
}

impl<S, U> Drop for FileStateStore<S, U> {
    fn drop(&mut self) {
        // Without this the autosave task would keep the writer alive forever
        if let Ok(mut running) = self.running.try_lock()
            && let Some(running) = running.take()
            && let Some(autosave) = running.autosave
        {
            autosave.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Change, Counter, change, counter};
    use tempfile::tempdir;

    type TestStore = FileStateStore<Counter, Change>;

    fn options() -> StoreOptions {
        StoreOptions::default().without_autosave()
    }

    #[tokio::test]
    async fn test_requires_initialize() {
        let temp = tempdir().unwrap();
        let store = TestStore::new(temp.path(), options());

        assert!(matches!(store.get_state("a").await, Err(StoreError::NotInitialized)));
        assert!(matches!(
            store.save_state("a", counter(1)).await,
            Err(StoreError::NotInitialized)
        ));
        assert!(matches!(store.clear().await, Err(StoreError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let temp = tempdir().unwrap();
        let store = TestStore::new(temp.path().join("nested").join("dir"), options());
        store.initialize().await.unwrap();

        assert!(store.get_all_states().await.unwrap().is_empty());
        assert!(store.get_recent_history(None).await.unwrap().is_empty());
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let temp = tempdir().unwrap();
        let store = TestStore::new(temp.path(), options());
        store.initialize().await.unwrap();
        store.save_state("a", counter(1)).await.unwrap();

        // A second initialize must not reload or reset anything
        store.initialize().await.unwrap();
        assert_eq!(store.get_state("a").await.unwrap().map(|c| c.value), Some(1));
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_through_persists_immediately() {
        let temp = tempdir().unwrap();
        let store = TestStore::new(temp.path(), options());
        store.initialize().await.unwrap();

        store.save_state("a", counter(7)).await.unwrap();

        let content = std::fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["states"]["a"]["value"], 7);
        assert!(json["history"].as_array().unwrap().is_empty());

        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_persist_across_instances() {
        let temp = tempdir().unwrap();

        let store = TestStore::new(temp.path(), options());
        store.initialize().await.unwrap();
        store.save_state("a", counter(1)).await.unwrap();
        store.save_state("b", counter(2)).await.unwrap();
        store.save_state_update(change("a", 1)).await.unwrap();
        store.save_state_update(change("b", 2)).await.unwrap();
        store.save_state_update(change("a", 3)).await.unwrap();

        let states_before = store.get_all_states().await.unwrap();
        let history_before = store.get_state_history("a", None).await.unwrap();
        store.shutdown().await.unwrap();

        let reopened = TestStore::new(temp.path(), options());
        reopened.initialize().await.unwrap();

        // Deep equality includes the chrono timestamps
        assert_eq!(reopened.get_all_states().await.unwrap(), states_before);
        assert_eq!(reopened.get_state_history("a", None).await.unwrap(), history_before);
        assert_eq!(reopened.get_recent_history(None).await.unwrap().len(), 3);
        reopened.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_history_limit_and_filter() {
        let temp = tempdir().unwrap();
        let store = TestStore::new(temp.path(), options().with_history_limit(5));
        store.initialize().await.unwrap();

        for value in 0..8 {
            store.save_state_update(change("a", value)).await.unwrap();
        }
        store.save_state_update(change("b", 100)).await.unwrap();

        let a = store.get_state_history("a", None).await.unwrap();
        assert_eq!(a.iter().map(|c| c.value).collect::<Vec<_>>(), vec![7, 6, 5, 4]);

        let limited = store.get_state_history("a", Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].value, 7);

        assert_eq!(store.get_recent_history(None).await.unwrap().len(), 5);
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_writes_are_serialized() {
        let temp = tempdir().unwrap();
        let store = Arc::new(TestStore::new(temp.path(), options()));
        store.initialize().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20u32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.save_state(&format!("agent-{}", i), counter(i)).await.unwrap();
                store.save_state_update(change(&format!("agent-{}", i), i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        store.shutdown().await.unwrap();

        // The file on disk must be a complete, parseable snapshot holding everything
        let bytes = std::fs::read(temp.path().join(SNAPSHOT_FILE_NAME)).unwrap();
        let snapshot: Snapshot<Counter, Change> = Snapshot::from_json(&bytes, 1000).unwrap();
        assert_eq!(snapshot.states.len(), 20);
        assert_eq!(snapshot.history.len(), 20);
    }

    #[tokio::test]
    async fn test_clear_persists() {
        let temp = tempdir().unwrap();
        let store = TestStore::new(temp.path(), options());
        store.initialize().await.unwrap();
        store.save_state("a", counter(1)).await.unwrap();
        store.save_state_update(change("a", 1)).await.unwrap();
        store.clear().await.unwrap();
        store.shutdown().await.unwrap();

        let reopened = TestStore::new(temp.path(), options());
        reopened.initialize().await.unwrap();
        assert_eq!(reopened.get_state("a").await.unwrap(), None);
        assert!(reopened.get_state_history("a", None).await.unwrap().is_empty());
        reopened.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_persistence_error() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join(SNAPSHOT_FILE_NAME), "{ not json").unwrap();

        let store = TestStore::new(temp.path(), options());
        let result = store.initialize().await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
        assert!(result.unwrap_err().is_persistence());
        assert!(!store.is_initialized().await);
    }

    #[tokio::test]
    async fn test_autosave_writes_snapshot() {
        let temp = tempdir().unwrap();
        let store = TestStore::new(
            temp.path(),
            StoreOptions::default().with_autosave_interval(Duration::from_millis(20)),
        );
        store.initialize().await.unwrap();

        // Mutate memory directly so only the autosave can put it on disk
        store.data.lock().await.put_state("a", counter(9));
        tokio::time::sleep(Duration::from_millis(120)).await;

        let content = std::fs::read_to_string(store.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["states"]["a"]["value"], 9);
        store.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_without_initialize_is_noop() {
        let temp = tempdir().unwrap();
        let store = TestStore::new(temp.path(), options());
        store.shutdown().await.unwrap();
        assert!(!temp.path().join(SNAPSHOT_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_read_snapshot_leaves_disk_alone() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("state");
        let store = TestStore::new(&dir, options());

        let empty = store.read_snapshot().await.unwrap();
        assert!(empty.states.is_empty());
        assert!(!dir.exists());

        store.initialize().await.unwrap();
        store.save_state("a", counter(7)).await.unwrap();
        store.save_state_update(change("a", 7)).await.unwrap();
        store.shutdown().await.unwrap();
        let before = std::fs::read(store.path()).unwrap();

        let reader = TestStore::new(&dir, options());
        let snapshot = reader.read_snapshot().await.unwrap();
        assert_eq!(snapshot.states["a"].value, 7);
        assert_eq!(snapshot.history_for("a", None).len(), 1);
        assert!(!reader.is_initialized().await);
        assert_eq!(std::fs::read(reader.path()).unwrap(), before);
    }
}
