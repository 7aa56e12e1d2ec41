//! Export configuration constants and runtime settings

use crate::fetcher::PAGE_SIZE_MAX;
use crate::storage::ExportPaths;
use crate::{DetailLevel, StateFilter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum number of retries for a failed page fetch.
/// 5 retries with exponential backoff ride out transient network issues
/// without looping on persistent failures (max total wait ~1 minute).
pub const MAX_RETRIES: u32 = 5;

/// Initial retry backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum retry backoff delay in milliseconds.
/// Retry 5 would be 32s; capped to 30s.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Ceiling for a server-provided wait (`Retry-After` or a quota reset), in seconds.
/// Reset hints can name the end of an hourly window; waits beyond this are cut
/// short and the retry budget decides what happens next.
pub const MAX_SERVER_WAIT_SECS: u64 = 300;

/// Default page size; the provider's maximum.
pub const DEFAULT_PAGE_SIZE: u32 = PAGE_SIZE_MAX;

/// Baseline pause before every page request, in milliseconds.
pub const BASE_DELAY_MS: u64 = 1500;

/// A long cooldown is inserted after this many consecutive batches.
pub const COOLDOWN_EVERY_BATCHES: u64 = 20;

/// Length of the periodic cooldown in milliseconds.
pub const COOLDOWN_MS: u64 = 10_000;

/// The pacing multiplier steps up once per this many batches.
pub const PROGRESSIVE_STEP_BATCHES: u64 = 10;

/// Multiplier increase per progressive step.
/// After 100 batches the delay is twice the base.
pub const PROGRESSIVE_FACTOR: f64 = 0.1;

/// Lower bound of the pacing jitter factor.
pub const JITTER_MIN: f64 = 0.8;

/// Upper bound of the pacing jitter factor.
pub const JITTER_MAX: f64 = 1.2;

/// Steady-state pacing multiplier applied per rate-limit event.
pub const RATE_LIMIT_ESCALATION: f64 = 1.5;

/// Ceiling for a single pacing delay in milliseconds.
pub const MAX_PACING_DELAY_MS: u64 = 60_000;

/// Consecutive successful batches that clear rate-limit escalation.
pub const RESET_AFTER_SUCCESSES: u32 = 5;

/// Format errors are retried at most this many times before becoming terminal.
pub const MAX_FORMAT_RETRIES: u32 = 2;

/// Loop guard; no export needs more pages than this.
pub const MAX_BATCHES: u64 = 100_000;

/// Calculate exponential backoff delay (before jitter)
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let delay_ms = 2u64
        .checked_pow(retry_count)
        .and_then(|factor| INITIAL_BACKOFF_MS.checked_mul(factor))
        .unwrap_or(MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms.min(MAX_BACKOFF_MS))
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Page size outside `1..=PAGE_SIZE_MAX`
    #[error("page size must be between 1 and {max}, got {value}")]
    PageSize {
        /// Rejected value
        value: u32,
        /// Provider maximum
        max: u32,
    },

    /// Non-positive duration or cadence
    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),

    /// Run cap of zero
    #[error("max articles must be at least 1")]
    ZeroCap,
}

/// Pacing parameters handed to the rate controller
#[derive(Debug, Clone, PartialEq)]
pub struct PacingConfig {
    /// Baseline pause before each request
    pub base_delay: Duration,
    /// Cooldown cadence in batches
    pub cooldown_every: u64,
    /// Cooldown length
    pub cooldown: Duration,
    /// Batches per progressive step
    pub progressive_step: u64,
    /// Multiplier increase per step
    pub progressive_factor: f64,
    /// Jitter factor range
    pub jitter: (f64, f64),
    /// Multiplier per rate-limit event
    pub escalation: f64,
    /// Ceiling for one pacing delay
    pub max_delay: Duration,
    /// Successes that clear escalation
    pub reset_after_successes: u32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            cooldown_every: COOLDOWN_EVERY_BATCHES,
            cooldown: Duration::from_millis(COOLDOWN_MS),
            progressive_step: PROGRESSIVE_STEP_BATCHES,
            progressive_factor: PROGRESSIVE_FACTOR,
            jitter: (JITTER_MIN, JITTER_MAX),
            escalation: RATE_LIMIT_ESCALATION,
            max_delay: Duration::from_millis(MAX_PACING_DELAY_MS),
            reset_after_successes: RESET_AFTER_SUCCESSES,
        }
    }
}

impl PacingConfig {
    /// No pauses at all; for in-memory sources and tests
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            cooldown: Duration::ZERO,
            jitter: (1.0, 1.0),
            ..Self::default()
        }
    }
}

/// Retry parameters handed to the retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First backoff delay
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
    /// Ceiling for a server-provided wait; may exceed `max_backoff`
    pub max_server_wait: Duration,
    /// Retries allowed for format errors
    pub max_format_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            max_server_wait: Duration::from_secs(MAX_SERVER_WAIT_SECS),
            max_format_retries: MAX_FORMAT_RETRIES,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `retry` (0-based), before jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Runtime settings for one export run
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Output directory
    pub output_dir: PathBuf,
    /// Store and checkpoint locations
    pub paths: ExportPaths,
    /// Articles requested per page
    pub page_size: u32,
    /// Run cap; the run completes once this many articles were fetched
    pub max_articles: Option<u64>,
    /// Explicit starting offset; overrides the checkpoint
    pub resume_from: Option<u64>,
    /// Listing filter
    pub state_filter: StateFilter,
    /// Payload detail
    pub detail: DetailLevel,
    /// Discard checkpoint and stores before running
    pub fresh: bool,
    /// Pacing
    pub pacing: PacingConfig,
    /// Retries
    pub retry: RetryConfig,
}

impl ExportConfig {
    /// Defaults with all files under `output_dir`
    pub fn new(output_dir: impl AsRef<Path>) -> Self {
        let output_dir = output_dir.as_ref().to_path_buf();
        Self {
            paths: ExportPaths::under(&output_dir),
            output_dir,
            page_size: DEFAULT_PAGE_SIZE,
            max_articles: None,
            resume_from: None,
            state_filter: StateFilter::default(),
            detail: DetailLevel::default(),
            fresh: false,
            pacing: PacingConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Set page size
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set run cap
    pub fn with_max_articles(mut self, max_articles: Option<u64>) -> Self {
        self.max_articles = max_articles;
        self
    }

    /// Set explicit starting offset
    pub fn with_resume_from(mut self, offset: Option<u64>) -> Self {
        self.resume_from = offset;
        self
    }

    /// Set listing filter and detail level
    pub fn with_listing(mut self, state_filter: StateFilter, detail: DetailLevel) -> Self {
        self.state_filter = state_filter;
        self.detail = detail;
        self
    }

    /// Discard previous progress before running
    pub fn with_fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    /// Override pacing
    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    /// Override retries
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Check settings before a run
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 || self.page_size > PAGE_SIZE_MAX {
            return Err(ConfigError::PageSize {
                value: self.page_size,
                max: PAGE_SIZE_MAX,
            });
        }
        if self.max_articles == Some(0) {
            return Err(ConfigError::ZeroCap);
        }
        if self.pacing.cooldown_every == 0 {
            return Err(ConfigError::NonPositive("cooldown cadence"));
        }
        if self.pacing.progressive_step == 0 {
            return Err(ConfigError::NonPositive("progressive step"));
        }
        if self.pacing.escalation < 1.0 {
            return Err(ConfigError::NonPositive("rate limit escalation above 1"));
        }
        if self.retry.initial_backoff.is_zero() && !self.retry.max_backoff.is_zero() {
            return Err(ConfigError::NonPositive("initial backoff"));
        }
        Ok(())
    }

    /// Page size for the next request, trimmed to what the cap still allows
    pub fn next_count(&self, fetched_this_run: u64) -> u32 {
        match self.max_articles {
            Some(cap) => {
                let left = cap.saturating_sub(fetched_this_run);
                left.min(self.page_size as u64) as u32
            }
            None => self.page_size,
        }
    }
}
