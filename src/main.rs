//! Main entry point for the pocket-exporter CLI

use anyhow::Context;
use clap::Parser;
use pocket_exporter::cli::{Cli, CliError, Commands};
use pocket_exporter::metrics::init_metrics;
use pocket_exporter::shutdown::{self, ShutdownCoordinator};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Initialize tracing: console on stderr (JSON with `LOG_FORMAT=json`) plus
/// an optional plain-text run log appended to `log_path`.
fn init_tracing(log_path: Option<&Path>) -> anyhow::Result<()> {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pocket_exporter=info"));

    let console = if json_format {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let run_log = match log_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening run log {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(run_log)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(())
}

fn exit_code(result: Result<(), CliError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(error_class = e.class(), "Command failed: {}", e);
            eprintln!("Error: {e}");
            e.exit_code()
        }
    }
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments; usage errors exit with code 2
    let cli = Cli::parse();

    let log_path = matches!(cli.command, Commands::Export(_)).then(|| cli.log_path());
    if let Err(e) = init_tracing(log_path.as_deref()) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = init_metrics(addr).await {
            warn!(error = %e, "Metrics endpoint disabled");
        }
    }

    // Ctrl+C stops the export at the next suspension point
    let shutdown = ShutdownCoordinator::shared();
    shutdown::listen_for_ctrl_c(shutdown.clone());

    let code = match &cli.command {
        Commands::Export(args) => match args.execute(&cli, shutdown.clone()).await {
            Ok(report) => report.status.exit_code(),
            Err(e) => exit_code(Err(e)),
        },
        Commands::Status(cmd) => exit_code(cmd.execute(&cli).await),
        Commands::Verify(cmd) => exit_code(cmd.execute(&cli).await),
    };

    std::process::exit(code);
}
