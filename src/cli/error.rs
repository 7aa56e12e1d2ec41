//! CLI error types and conversions

use crate::checkpoint::CheckpointError;
use crate::credential::CredentialError;
use crate::export::ExportError;
use crate::storage::StorageError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Credential error
    #[error("credential error: {0}. Set POCKET_CONSUMER_KEY and POCKET_ACCESS_TOKEN (a .env file works too)")]
    Credential(#[from] CredentialError),

    /// Export error
    #[error("export error: {0}")]
    Export(#[from] ExportError),

    /// Checkpoint error
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Stores and checkpoint disagree
    #[error("verification failed: {0} issue(s) found")]
    Inconsistent(usize),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl CliError {
    /// Stable class label, shared with the export run summary
    pub fn class(&self) -> &'static str {
        match self {
            Self::Credential(_) => "credential",
            Self::Export(e) => e.class(),
            Self::Checkpoint(_) | Self::Storage(_) => "persistence",
            Self::Inconsistent(_) => "inconsistent",
            Self::InvalidArgument(_) => "config",
        }
    }

    /// Process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Export(e) if e.is_interrupt() => 130,
            Self::InvalidArgument(_) => 2,
            _ => 1,
        }
    }
}
