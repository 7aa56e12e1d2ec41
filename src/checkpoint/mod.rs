//! Checkpointing for export runs
//!
//! Durable state record with atomic writes, the exclusive run lock and the
//! store that ties both article stores to the resume offset.

pub mod lock;
pub mod state;
pub mod store;

pub use lock::RunLock;
pub use state::ExportState;
pub use store::{CheckpointStore, PersistStats};

use crate::storage::StorageError;
use std::path::PathBuf;

/// Errors related to checkpoints and persistence
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Article store failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Lock error
    #[error("lock error: {0}")]
    Lock(String),

    /// Another export holds the run lock
    #[error("another export is already running (lock held on {0})")]
    AlreadyRunning(PathBuf),
}
