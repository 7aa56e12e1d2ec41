//! Export command implementation

use super::CliError;
use crate::credential::{CredentialProvider, EnvCredentials};
use crate::export::{ExportConfig, ExportDriver, ExportReport, ExportStatus, PacingConfig, RetryConfig};
use crate::fetcher::pocket_http::{PocketHttpSource, POCKET_GET_URL};
use crate::fetcher::shared_resources::global_http_client;
use crate::fetcher::PAGE_SIZE_MAX;
use crate::shutdown::SharedShutdown;
use crate::{DetailLevel, StateFilter};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

/// Pocket exporter CLI
#[derive(Parser, Debug)]
#[command(name = "pocket-exporter")]
#[command(about = "Resumable export of a Pocket saved-article archive", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Directory holding the stores, the checkpoint and the run log
    #[arg(long, global = true, default_value = "pocket_export")]
    pub output_dir: PathBuf,

    /// Run log location (default: <output-dir>/export_logs.txt)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Run log location
    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| ExportConfig::new(&self.output_dir).paths.log)
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export (or resume exporting) the archive
    Export(ExportArgs),

    /// Show the checkpoint and store summaries without contacting the provider
    Status(super::StatusCommand),

    /// Check that the stores and the checkpoint agree
    Verify(super::VerifyCommand),
}

/// Export command arguments
#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Start at this offset instead of the checkpoint
    #[arg(long)]
    pub resume_from: Option<u64>,

    /// Stop after this many articles (sample runs)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_articles: Option<u64>,

    /// Articles per request (max 272)
    #[arg(long, default_value_t = PAGE_SIZE_MAX, value_parser = parse_page_size)]
    pub page_size: u32,

    /// Maximum number of retries per page (default: 5, range: 0-20)
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: u32,

    /// Baseline pause before each request, in milliseconds
    #[arg(long, default_value = "1500", value_parser = clap::value_parser!(u64).range(1..))]
    pub base_delay_ms: u64,

    /// Take a long break every N batches
    #[arg(long, default_value = "20", value_parser = clap::value_parser!(u64).range(1..))]
    pub cooldown_every: u64,

    /// Length of the long break, in milliseconds
    #[arg(long, default_value = "10000")]
    pub cooldown_ms: u64,

    /// Which articles to export: all, unread or archive
    #[arg(long, default_value = "all")]
    pub state: StateFilter,

    /// Payload detail: simple or complete
    #[arg(long, default_value = "complete")]
    pub detail: DetailLevel,

    /// Discard the checkpoint and both stores before running
    #[arg(long, default_value_t = false)]
    pub fresh: bool,

    /// Disable the progress spinner
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,

    /// Provider endpoint
    #[arg(long, hide = true, default_value = POCKET_GET_URL)]
    pub endpoint: String,
}

fn parse_page_size(s: &str) -> Result<u32, String> {
    let value: u32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value == 0 || value > PAGE_SIZE_MAX {
        return Err(format!(
            "page size must be between 1 and {PAGE_SIZE_MAX}, got {value}"
        ));
    }
    Ok(value)
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

impl ExportArgs {
    /// Runtime configuration for these flags
    pub fn to_config(&self, cli: &Cli) -> ExportConfig {
        let pacing = PacingConfig {
            base_delay: Duration::from_millis(self.base_delay_ms),
            cooldown_every: self.cooldown_every,
            cooldown: Duration::from_millis(self.cooldown_ms),
            ..PacingConfig::default()
        };
        let retry = RetryConfig {
            max_retries: self.max_retries,
            ..RetryConfig::default()
        };

        ExportConfig::new(&cli.output_dir)
            .with_page_size(self.page_size)
            .with_max_articles(self.max_articles)
            .with_resume_from(self.resume_from)
            .with_listing(self.state, self.detail)
            .with_fresh(self.fresh)
            .with_pacing(pacing)
            .with_retry(retry)
    }

    /// Execute the export
    pub async fn execute(
        &self,
        cli: &Cli,
        shutdown: SharedShutdown,
    ) -> Result<ExportReport, CliError> {
        let credential = EnvCredentials::new().get_credential()?;
        info!(credential = ?credential, "Credential loaded");

        let config = self.to_config(cli);
        let source = PocketHttpSource::with_client(global_http_client(), self.endpoint.clone());
        let mut driver = ExportDriver::new(source, credential, config).with_shutdown(shutdown);

        if cli.output_format == OutputFormat::Human && !self.no_progress {
            driver = driver.with_progress_bar(create_progress_bar(self.max_articles));
        }

        let report = driver.run().await?;

        match cli.output_format {
            OutputFormat::Json => output_json(&report),
            OutputFormat::Human => output_human(&report),
        }

        Ok(report)
    }
}

/// Output the run report as one JSON line
fn output_json(report: &ExportReport) {
    match serde_json::to_string(report) {
        Ok(line) => println!("{line}"),
        Err(e) => error!(error = %e, "Failed to serialize export report"),
    }
}

/// Output the run report in human-readable form
fn output_human(report: &ExportReport) {
    match &report.status {
        ExportStatus::Complete => {
            println!("\nExport completed successfully!");
            if report.capped {
                println!("Stopped at the article cap; rerun without --max-articles to continue");
            }
        }
        ExportStatus::Failed { class, message } => {
            eprintln!("\nExport failed! ({class})");
            eprintln!("Error: {message}");
        }
        ExportStatus::Interrupted => {
            eprintln!("\nExport interrupted - progress saved");
        }
    }

    println!("Total fetched: {}", report.state.total_fetched);
    println!("This run: {} articles in {} batches", report.articles_this_run, report.batches);
    println!("Resume offset: {}", report.resume_offset());
    if report.retries > 0 {
        println!(
            "Retries: {} ({} rate limited)",
            report.retries, report.rate_limit_events
        );
    }
    for summary in [&report.raw_file, &report.normalized_file].into_iter().flatten() {
        println!("{summary}");
    }
}

/// Create a bar when capped, a spinner otherwise
fn create_progress_bar(cap: Option<u64>) -> ProgressBar {
    let pb = match cap {
        Some(cap) => {
            let pb = ProgressBar::new(cap);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                    .expect("hardcoded template is valid")
                    .progress_chars("#>-"),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {pos} articles {msg}")
                    .expect("hardcoded template is valid"),
            );
            pb
        }
    };
    pb.enable_steady_tick(Duration::from_millis(200));
    pb
}
