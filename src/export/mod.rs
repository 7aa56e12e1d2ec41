//! Export orchestration: pacing, retries and the driver loop
//!
//! # Overview
//!
//! One export run is a single stream of page fetches:
//!
//! 1. **Pacing**: [`rate_limit::RateController`] decides the pre-fetch delay
//! 2. **Fetching**: [`retry::RetryPolicy`] wraps one [`crate::fetcher::ArticleSource`] call
//! 3. **Persisting**: [`crate::checkpoint::CheckpointStore`] records the page, then the offset
//! 4. **Termination**: completion indicator or an empty page, run cap, or a terminal error
//!
//! The driver state machine lives in [`driver::ExportDriver`].
//!
//! # Error Handling
//!
//! Errors before the loop starts (bad configuration, a held run lock, an
//! unreadable checkpoint) are returned as [`ExportError`]. Errors inside the
//! loop end the run with [`ExportStatus::Failed`] and leave the last saved
//! checkpoint intact.

pub mod config;
pub mod driver;
pub mod progress;
pub mod rate_limit;
pub mod retry;

pub use config::{ConfigError, ExportConfig, PacingConfig, RetryConfig};
pub use driver::{ExportDriver, ExportReport, ExportStatus};
pub use progress::{ProgressState, ProgressTracker};
pub use rate_limit::{BatchOutcome, PacingDecision, RateController, RateState};
pub use retry::{GiveUp, GiveUpReason, RetriedBatch, RetryPolicy};

use crate::checkpoint::CheckpointError;
use crate::credential::CredentialError;
use crate::fetcher::FetchErrorClass;
use crate::{DetailLevel, StateFilter};

/// Export errors
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Checkpoint was written with a different listing
    #[error(
        "checkpoint was created with --state {checkpoint_state} --detail {checkpoint_detail}, \
         but this run asks for --state {requested_state} --detail {requested_detail}; \
         rerun with matching flags or with --fresh"
    )]
    ListingMismatch {
        /// Filter recorded in the checkpoint
        checkpoint_state: StateFilter,
        /// Detail recorded in the checkpoint
        checkpoint_detail: DetailLevel,
        /// Filter requested now
        requested_state: StateFilter,
        /// Detail requested now
        requested_detail: DetailLevel,
    },

    /// Credential missing or invalid
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Page fetch gave up
    #[error("fetch failed: {0}")]
    Fetch(#[from] GiveUp),

    /// Store or checkpoint failure
    #[error("persistence error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Loop guard tripped
    #[error("stopped after {0} batches without reaching the end of the archive")]
    BatchLimit(u64),

    /// Operator interrupt
    #[error("interrupted")]
    Interrupted,
}

impl ExportError {
    /// Stable class label for logs, JSON output and metrics
    pub fn class(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::ListingMismatch { .. } => "config",
            Self::Credential(_) => "credential",
            Self::Fetch(give_up) => match (give_up.reason, give_up.class()) {
                (GiveUpReason::Interrupted, _) => "interrupted",
                (_, Some(FetchErrorClass::Auth)) => "auth",
                (_, Some(FetchErrorClass::RateLimit)) => "rate_limit_exhausted",
                (_, Some(FetchErrorClass::TransientNetwork)) => "network_exhausted",
                (_, Some(FetchErrorClass::Format)) => "format",
                (_, Some(FetchErrorClass::Fatal)) | (_, None) => "fatal",
            },
            Self::Checkpoint(CheckpointError::AlreadyRunning(_)) => "locked",
            Self::Checkpoint(_) => "persistence",
            Self::BatchLimit(_) => "fatal",
            Self::Interrupted => "interrupted",
        }
    }

    /// Whether this error stands for an operator interrupt
    pub fn is_interrupt(&self) -> bool {
        self.class() == "interrupted"
    }
}
