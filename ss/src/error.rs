//! Store errors

use std::path::PathBuf;

use thiserror::Error;

/// Errors from state store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State store is not initialized. Call initialize() first.")]
    NotInitialized,

    #[error("Persistence error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("Snapshot writer stopped")]
    WriterClosed,
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures reading or writing the snapshot (as opposed to misuse)
    pub fn is_persistence(&self) -> bool {
        !matches!(self, Self::NotInitialized)
    }
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
