//! Checkpoint store: the two article stores plus the state record
//!
//! Write order per batch is raw store, normalized store, state record.
//! A crash at any point leaves the state record at or behind the data,
//! never ahead of it.

use super::state::ExportState;
use super::CheckpointError;
use crate::fetcher::Batch;
use crate::storage::{ExportPaths, FileSummary, JsonlStore, RawStore};
use crate::ArticleRecord;
use tracing::{debug, info, warn};

/// What one `persist_batch` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    /// Articles in the batch
    pub articles: u64,
    /// Entries in the raw store afterwards
    pub raw_total: u64,
    /// Records added to the normalized store
    pub added: u64,
    /// Records replaced in the normalized store
    pub replaced: u64,
    /// Distinct records in the normalized store afterwards
    pub stored: u64,
}

/// Durable record of fetched pages and the resume offset
#[derive(Debug)]
pub struct CheckpointStore {
    paths: ExportPaths,
    raw: RawStore,
    normalized: JsonlStore,
}

impl CheckpointStore {
    /// Open the stores under `paths`
    pub fn open(paths: ExportPaths) -> Result<Self, CheckpointError> {
        let raw = RawStore::new(&paths.raw);
        let normalized = JsonlStore::open(&paths.normalized)?;
        Ok(Self {
            paths,
            raw,
            normalized,
        })
    }

    /// Delete the checkpoint and both stores
    pub fn reset(paths: &ExportPaths) -> Result<(), CheckpointError> {
        for path in [&paths.raw, &paths.normalized, &paths.state] {
            match std::fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "Removed for fresh export"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CheckpointError::Io(format!("{}: {e}", path.display()))),
            }
        }
        Ok(())
    }

    /// File locations
    pub fn paths(&self) -> &ExportPaths {
        &self.paths
    }

    /// Distinct records in the normalized store
    pub fn stored_articles(&self) -> u64 {
        self.normalized.len()
    }

    /// Durably record `batch` in the raw store and `records` in the normalized store.
    ///
    /// Does not touch the state record; call [`save_state`](Self::save_state)
    /// only after this returns `Ok`.
    pub fn persist_batch(
        &mut self,
        batch: &Batch,
        records: &[ArticleRecord],
    ) -> Result<PersistStats, CheckpointError> {
        let raw = self.raw.merge_batch(&batch.articles)?;
        let normalized = self.normalized.write_batch(records)?;

        let stats = PersistStats {
            articles: batch.len() as u64,
            raw_total: raw.total,
            added: normalized.added,
            replaced: normalized.replaced,
            stored: self.normalized.len(),
        };

        if normalized.replaced > 0 {
            info!(
                offset = batch.requested_offset,
                replaced = normalized.replaced,
                "Duplicate ids replaced with latest records"
            );
        }
        debug!(
            offset = batch.requested_offset,
            articles = stats.articles,
            raw_total = stats.raw_total,
            stored = stats.stored,
            "Batch persisted"
        );
        Ok(stats)
    }

    /// Load the checkpoint, reconciled against the stores.
    ///
    /// If either store holds fewer distinct articles than the checkpoint
    /// recorded, the offset is rounded down by the shortfall so the missing
    /// range is fetched again. Returns `Ok(None)` when no checkpoint exists.
    pub fn load_state(&self) -> Result<Option<ExportState>, CheckpointError> {
        let Some(mut state) = ExportState::load(&self.paths.state)? else {
            return Ok(None);
        };

        let raw_count = self.raw.count()?;
        let normalized_count = self.normalized.len();
        let persisted = raw_count.min(normalized_count);

        if persisted < state.stored_articles {
            let shortfall = state.stored_articles - persisted;
            let resume_at = state.offset.saturating_sub(shortfall);
            warn!(
                checkpoint_offset = state.offset,
                raw_count = raw_count,
                normalized_count = normalized_count,
                resume_at = resume_at,
                "Stores hold fewer articles than the checkpoint; rounding offset down"
            );
            state.offset = resume_at;
            state.stored_articles = persisted;
            state.completed_at = None;
        }

        Ok(Some(state))
    }

    /// Durably write the checkpoint record
    pub fn save_state(&self, state: &ExportState) -> Result<(), CheckpointError> {
        state.save(&self.paths.state)
    }

    /// Summaries of both stores
    pub fn summaries(&self) -> Result<(FileSummary, FileSummary), CheckpointError> {
        Ok((
            FileSummary::raw(&self.paths.raw)?,
            FileSummary::jsonl(&self.paths.normalized)?,
        ))
    }
}
