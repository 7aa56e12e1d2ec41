//! Status subcommand

use super::{Cli, CliError, OutputFormat};
use crate::checkpoint::ExportState;
use crate::storage::{ExportPaths, FileSummary};
use clap::Parser;
use serde::Serialize;

/// Show the checkpoint record and store summaries
#[derive(Parser, Debug)]
pub struct StatusCommand {}

/// Everything `status` reports
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Checkpoint record, if any
    pub checkpoint: Option<ExportState>,
    /// Raw store summary
    pub raw_file: FileSummary,
    /// Normalized store summary
    pub normalized_file: FileSummary,
}

impl StatusCommand {
    /// Gather the report without modifying any file
    pub fn gather(paths: &ExportPaths) -> Result<StatusReport, CliError> {
        Ok(StatusReport {
            checkpoint: ExportState::load(&paths.state)?,
            raw_file: FileSummary::raw(&paths.raw)?,
            normalized_file: FileSummary::jsonl(&paths.normalized)?,
        })
    }

    /// Execute the status command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let paths = ExportPaths::under(&cli.output_dir);
        let report = Self::gather(&paths)?;

        match cli.output_format {
            OutputFormat::Json => {
                let line = serde_json::to_string(&report)
                    .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
                println!("{line}");
            }
            OutputFormat::Human => print_human(&report),
        }
        Ok(())
    }
}

fn print_human(report: &StatusReport) {
    match &report.checkpoint {
        Some(state) => {
            let phase = if state.is_complete() {
                "complete"
            } else {
                "in progress"
            };
            println!("Export {phase}");
            println!("  Offset: {}", state.offset);
            println!("  Total fetched: {}", state.total_fetched);
            println!("  Batches: {}", state.batch_index);
            println!("  Listing: --state {} --detail {}", state.state_filter, state.detail);
            println!("  Started: {}", state.started_at.to_rfc3339());
            println!("  Last checkpoint: {}", state.last_checkpoint_at.to_rfc3339());
            if let Some(done) = state.completed_at {
                println!("  Completed: {}", done.to_rfc3339());
            }
        }
        None => println!("No checkpoint found - the next export starts at offset 0"),
    }
    println!("{}", report.raw_file);
    println!("{}", report.normalized_file);
}
