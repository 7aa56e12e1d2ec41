//! Export state persistence
//!
//! Atomic writes (temp file, fsync, rename, directory fsync) and schema
//! versioning for the checkpoint record. The record is the single resume
//! key; logs are never consulted.

use super::CheckpointError;
use crate::{DetailLevel, StateFilter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Current export state schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed state file size (1 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 1024 * 1024;

/// Durable export progress.
///
/// `offset` only moves after a batch is in both stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportState {
    schema_version: String,
    /// Resume cursor: articles already durably processed
    pub offset: u64,
    /// Articles persisted across all batches of this export
    pub total_fetched: u64,
    /// Batches persisted
    pub batch_index: u64,
    /// Distinct articles in the normalized store after the last batch
    #[serde(default)]
    pub stored_articles: u64,
    /// When this export first started
    pub started_at: DateTime<Utc>,
    /// When the record was last written
    pub last_checkpoint_at: DateTime<Utc>,
    /// Listing filter the export runs with
    #[serde(default)]
    pub state_filter: StateFilter,
    /// Detail level the export runs with
    #[serde(default)]
    pub detail: DetailLevel,
    /// Set once the provider reported no more pages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportState {
    /// Fresh state at offset 0
    pub fn new(state_filter: StateFilter, detail: DetailLevel) -> Self {
        Self::starting_at(0, state_filter, detail)
    }

    /// Fresh state at an explicit offset
    pub fn starting_at(offset: u64, state_filter: StateFilter, detail: DetailLevel) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            offset,
            total_fetched: 0,
            batch_index: 0,
            stored_articles: 0,
            started_at: now,
            last_checkpoint_at: now,
            state_filter,
            detail,
            completed_at: None,
        }
    }

    /// Schema version of this record
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Advance past a persisted batch of `articles` articles
    pub fn advance(&mut self, articles: u64, stored_articles: u64) {
        self.offset += articles;
        self.total_fetched += articles;
        self.batch_index += 1;
        self.stored_articles = stored_articles;
        self.last_checkpoint_at = Utc::now();
    }

    /// Mark the export as finished
    pub fn finalize(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.last_checkpoint_at = now;
    }

    /// Whether the export has finished
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Validate schema version (accepts current version only)
    pub fn validate_schema_version(&self) -> Result<(), CheckpointError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(CheckpointError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }

    /// Save state atomically.
    ///
    /// Writes a sibling temp file, syncs it, renames it over `path` and syncs
    /// the directory, so a crash leaves either the old or the new record.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        debug!(
            path = %path.display(),
            offset = self.offset,
            batch_index = self.batch_index,
            "Saving export state"
        );

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let parent_dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent,
            None => Path::new("."),
        };
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| CheckpointError::Io(format!("Failed to create temp file: {e}")))?;

        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| CheckpointError::Io(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| CheckpointError::Io(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| CheckpointError::Io(format!("Failed to sync temp file: {e}")))?;

        temp_file
            .persist(path)
            .map_err(|e| CheckpointError::Io(format!("Failed to persist temp file: {e}")))?;

        if let Ok(dir) = std::fs::File::open(parent_dir) {
            let _ = dir.sync_all();
        }

        info!(
            path = %path.display(),
            offset = self.offset,
            total_fetched = self.total_fetched,
            "Export state saved"
        );
        Ok(())
    }

    /// Load state from `path`.
    ///
    /// Returns `Ok(None)` when no checkpoint exists.
    pub fn load(path: &Path) -> Result<Option<Self>, CheckpointError> {
        debug!(path = %path.display(), "Loading export state");

        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No export state found");
                return Ok(None);
            }
            Err(e) => return Err(CheckpointError::Io(e.to_string())),
        };

        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(CheckpointError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| CheckpointError::Io(e.to_string()))?;

        let state: ExportState = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, "Failed to deserialize export state");
            CheckpointError::Deserialization(e.to_string())
        })?;

        if let Err(e) = state.validate_schema_version() {
            warn!(
                found_version = %state.schema_version,
                expected_version = SCHEMA_VERSION,
                "Export state schema version mismatch"
            );
            return Err(e);
        }

        info!(
            offset = state.offset,
            total_fetched = state.total_fetched,
            batch_index = state.batch_index,
            complete = state.is_complete(),
            "Export state loaded"
        );
        Ok(Some(state))
    }
}
