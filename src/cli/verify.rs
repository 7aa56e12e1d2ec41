//! Verify subcommand
//!
//! Offline consistency check of both stores against the checkpoint. Reads
//! only; a torn tail is reported here and repaired by the next export.

use super::{Cli, CliError, OutputFormat};
use crate::checkpoint::ExportState;
use crate::storage::jsonl::JsonlScan;
use crate::storage::{ExportPaths, RawStore};
use clap::Parser;
use serde::Serialize;

/// Check that the stores and the checkpoint agree
#[derive(Parser, Debug)]
pub struct VerifyCommand {}

/// Findings of one verification
#[derive(Debug, Serialize)]
pub struct VerifyReport {
    /// Checkpoint offset, if a checkpoint exists
    pub checkpoint_offset: Option<u64>,
    /// Distinct articles recorded by the checkpoint
    pub checkpoint_stored: Option<u64>,
    /// Entries in the raw store
    pub raw_count: Option<u64>,
    /// Line scan of the normalized store
    pub normalized: JsonlScan,
    /// Problems found
    pub issues: Vec<String>,
}

impl VerifyReport {
    /// No problems found
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

impl VerifyCommand {
    /// Inspect the files under `paths`
    pub fn inspect(paths: &ExportPaths) -> Result<VerifyReport, CliError> {
        let mut issues = Vec::new();

        let checkpoint = match ExportState::load(&paths.state) {
            Ok(state) => state,
            Err(e) => {
                issues.push(format!("checkpoint unreadable: {e}"));
                None
            }
        };

        let raw_count = match RawStore::new(&paths.raw).count() {
            Ok(count) => Some(count),
            Err(e) => {
                issues.push(format!("raw store unreadable: {e}"));
                None
            }
        };

        let normalized = JsonlScan::of(&paths.normalized)?;
        if normalized.duplicate_lines > 0 {
            issues.push(format!(
                "normalized store has {} duplicate id line(s)",
                normalized.duplicate_lines
            ));
        }
        if normalized.invalid_lines > 0 {
            issues.push(format!(
                "normalized store has {} unparseable line(s)",
                normalized.invalid_lines
            ));
        }
        if normalized.torn_tail_bytes > 0 {
            issues.push(format!(
                "normalized store ends with a torn line of {} bytes (the next export truncates it)",
                normalized.torn_tail_bytes
            ));
        }

        if let Some(raw) = raw_count {
            if raw != normalized.unique_ids {
                issues.push(format!(
                    "raw store holds {raw} articles but the normalized store holds {}",
                    normalized.unique_ids
                ));
            }
        }

        if let Some(state) = &checkpoint {
            if normalized.unique_ids < state.stored_articles {
                issues.push(format!(
                    "checkpoint records {} stored articles but the normalized store holds {}",
                    state.stored_articles, normalized.unique_ids
                ));
            }
            if let Some(raw) = raw_count.filter(|raw| *raw < state.stored_articles) {
                issues.push(format!(
                    "checkpoint records {} stored articles but the raw store holds {raw}",
                    state.stored_articles
                ));
            }
        }

        Ok(VerifyReport {
            checkpoint_offset: checkpoint.as_ref().map(|s| s.offset),
            checkpoint_stored: checkpoint.as_ref().map(|s| s.stored_articles),
            raw_count,
            normalized,
            issues,
        })
    }

    /// Execute the verify command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let report = Self::inspect(&ExportPaths::under(&cli.output_dir))?;

        match cli.output_format {
            OutputFormat::Json => {
                let line = serde_json::to_string(&report)
                    .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
                println!("{line}");
            }
            OutputFormat::Human => {
                if report.is_consistent() {
                    println!(
                        "Verify passed: {} articles, checkpoint offset {}",
                        report.normalized.unique_ids,
                        report.checkpoint_offset.unwrap_or(0)
                    );
                } else {
                    for issue in &report.issues {
                        eprintln!("  - {issue}");
                    }
                }
            }
        }

        if report.is_consistent() {
            Ok(())
        } else {
            Err(CliError::Inconsistent(report.issues.len()))
        }
    }
}
