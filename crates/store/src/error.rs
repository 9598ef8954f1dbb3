use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by [`DedupStore`](crate::DedupStore) operations.
///
/// Read-side failures (`Read`, `Corrupt`) come from loading persisted
/// state; write-side failures (`Write`, `Serialize`) come from an attempted
/// atomic replace and leave the previous file in place.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("persisted table {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// True for failures raised while loading persisted state.
    pub fn is_read(&self) -> bool {
        matches!(self, StoreError::Read { .. } | StoreError::Corrupt { .. })
    }

    /// True for failures raised by an attempted write.
    pub fn is_write(&self) -> bool {
        matches!(self, StoreError::Write { .. } | StoreError::Serialize(_))
    }
}
