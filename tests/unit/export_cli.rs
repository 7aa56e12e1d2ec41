//! Unit tests for export command-line parsing

use clap::Parser;
use pocket_exporter::cli::{Cli, Commands, OutputFormat};
use pocket_exporter::fetcher::PAGE_SIZE_MAX;
use pocket_exporter::{DetailLevel, StateFilter};
use std::path::PathBuf;
use std::time::Duration;

fn parse(args: &[&str]) -> Cli {
    let mut argv = vec!["pocket-exporter"];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

#[test]
fn test_export_defaults() {
    let cli = parse(&["export"]);
    let Commands::Export(args) = &cli.command else {
        panic!("expected export command");
    };

    assert_eq!(args.page_size, PAGE_SIZE_MAX);
    assert_eq!(args.max_retries, 5);
    assert_eq!(args.state, StateFilter::All);
    assert_eq!(args.detail, DetailLevel::Complete);
    assert!(args.max_articles.is_none());
    assert!(args.resume_from.is_none());
    assert!(!args.fresh);
    assert_eq!(cli.output_dir, PathBuf::from("pocket_export"));
    assert_eq!(cli.output_format, OutputFormat::Human);
    assert_eq!(cli.log_path(), PathBuf::from("pocket_export").join("export_logs.txt"));
}

#[test]
fn test_flags_flow_into_config() {
    let cli = parse(&[
        "export",
        "--output-dir",
        "/tmp/pocket",
        "--page-size",
        "100",
        "--max-articles",
        "250",
        "--resume-from",
        "544",
        "--state",
        "archive",
        "--detail",
        "simple",
        "--max-retries",
        "3",
        "--base-delay-ms",
        "2000",
        "--cooldown-every",
        "10",
        "--cooldown-ms",
        "5000",
        "--fresh",
    ]);
    let Commands::Export(args) = &cli.command else {
        panic!("expected export command");
    };
    let config = args.to_config(&cli);

    assert_eq!(config.page_size, 100);
    assert_eq!(config.max_articles, Some(250));
    assert_eq!(config.resume_from, Some(544));
    assert_eq!(config.state_filter, StateFilter::Archive);
    assert_eq!(config.detail, DetailLevel::Simple);
    assert!(config.fresh);
    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.pacing.base_delay, Duration::from_millis(2000));
    assert_eq!(config.pacing.cooldown_every, 10);
    assert_eq!(config.pacing.cooldown, Duration::from_millis(5000));
    assert_eq!(config.paths.state, PathBuf::from("/tmp/pocket/export_state.json"));
    assert!(config.validate().is_ok());
}

#[test]
fn test_global_flags_before_subcommand() {
    let cli = parse(&["--output-format", "json", "--log-file", "run.log", "status"]);
    assert_eq!(cli.output_format, OutputFormat::Json);
    assert_eq!(cli.log_path(), PathBuf::from("run.log"));
    assert!(matches!(cli.command, Commands::Status(_)));
}

#[test]
fn test_invalid_values_are_rejected() {
    let bad: &[&[&str]] = &[
        &["export", "--page-size", "0"],
        &["export", "--page-size", "273"],
        &["export", "--max-articles", "0"],
        &["export", "--max-retries", "21"],
        &["export", "--state", "favorite"],
        &["export", "--detail", "full"],
        &["--output-format", "xml", "status"],
        &["--metrics-addr", "not-an-address", "status"],
    ];
    for args in bad {
        let mut argv = vec!["pocket-exporter"];
        argv.extend_from_slice(args);
        assert!(Cli::try_parse_from(argv).is_err(), "accepted {args:?}");
    }
}

#[test]
fn test_metrics_address_parses() {
    let cli = parse(&["--metrics-addr", "127.0.0.1:9090", "verify"]);
    assert_eq!(cli.metrics_addr.map(|a| a.port()), Some(9090));
}
