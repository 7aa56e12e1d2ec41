//! Bounded retries around a single page fetch
//!
//! Only retryable classes are retried. Auth and fatal errors propagate on
//! the first occurrence, format errors get a small separate budget, and
//! every backoff sleep races the shutdown signal.

use super::config::RetryConfig;
use crate::fetcher::retry_formatter::RetryContext;
use crate::fetcher::{Batch, FetchError, FetchErrorClass, FetcherResult, PageRequest};
use crate::metrics::record_retry_backoff;
use crate::shutdown::{sleep_or_shutdown, ShutdownCoordinator};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// A page that arrived, possibly after failed attempts
#[derive(Debug)]
pub struct RetriedBatch {
    /// The fetched page
    pub batch: Batch,
    /// Classified errors seen before the successful attempt
    pub failures: Vec<FetchError>,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

/// Why the policy stopped trying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// Error class that must not be retried
    Terminal,
    /// Retry budget used up
    Exhausted,
    /// Shutdown requested between attempts
    Interrupted,
}

/// The policy stopped without a page
#[derive(Debug, Clone, thiserror::Error)]
pub struct GiveUp {
    /// Why it stopped
    pub reason: GiveUpReason,
    /// Every classified error, oldest first
    pub history: Vec<FetchError>,
    /// Attempts made
    pub attempts: u32,
}

impl GiveUp {
    /// Most recent error, if any attempt was made
    pub fn last_error(&self) -> Option<&FetchError> {
        self.history.last()
    }

    /// Class of the most recent error
    pub fn class(&self) -> Option<FetchErrorClass> {
        self.last_error().map(FetchError::class)
    }
}

impl fmt::Display for GiveUp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.reason, self.last_error()) {
            (GiveUpReason::Interrupted, _) => {
                write!(f, "interrupted after {} attempt(s)", self.attempts)
            }
            (GiveUpReason::Terminal, Some(e)) => write!(f, "{e}"),
            (GiveUpReason::Exhausted, Some(e)) => {
                write!(f, "gave up after {} attempts: {e}", self.attempts)
            }
            (_, None) => write!(f, "gave up after {} attempts", self.attempts),
        }
    }
}

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Policy with the given parameters
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Total attempts per page: one plus the retries
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0-based) after `error`.
    ///
    /// `min(initial * 2^retry, max)` scaled by `jitter` (expected in
    /// `[0.5, 1.0]`), but never shorter than a server-provided wait. The
    /// server wait itself is clamped to `max_server_wait`.
    pub fn backoff(&self, retry: u32, error: &FetchError, jitter: f64) -> Duration {
        let delay = self.config.backoff(retry).mul_f64(jitter.clamp(0.0, 1.0));
        match error.retry_after() {
            Some(hint) => delay.max(hint.min(self.config.max_server_wait)),
            None => delay,
        }
    }

    /// Run `fetch` until it yields a page or the policy gives up.
    pub async fn with_retry<F, Fut>(
        &self,
        request: &PageRequest,
        shutdown: Option<&ShutdownCoordinator>,
        mut fetch: F,
    ) -> Result<RetriedBatch, GiveUp>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FetcherResult<Batch>>,
    {
        let max_attempts = self.max_attempts();
        let mut history: Vec<FetchError> = Vec::new();
        let mut format_failures = 0u32;

        for attempt in 1..=max_attempts {
            if shutdown.is_some_and(|s| s.is_shutdown_requested()) {
                return Err(GiveUp {
                    reason: GiveUpReason::Interrupted,
                    history,
                    attempts: attempt - 1,
                });
            }

            let error = match fetch().await {
                Ok(batch) => {
                    if let Some(last) = history.last() {
                        let ctx = RetryContext::new(
                            attempt,
                            max_attempts,
                            last,
                            Duration::ZERO,
                            request.offset,
                            request.count,
                        );
                        info!("{}", ctx.format_success());
                    }
                    return Ok(RetriedBatch {
                        batch,
                        failures: history,
                        attempts: attempt,
                    });
                }
                Err(error) => error,
            };

            let class = error.class();
            if class == FetchErrorClass::Format {
                format_failures += 1;
            }
            let terminal = !error.is_retryable()
                || (class == FetchErrorClass::Format
                    && format_failures > self.config.max_format_retries);

            if terminal || attempt == max_attempts {
                let ctx = RetryContext::new(
                    attempt,
                    max_attempts,
                    &error,
                    Duration::ZERO,
                    request.offset,
                    request.count,
                );
                error!(
                    error_class = class.as_str(),
                    attempts = attempt,
                    "{}",
                    ctx.format_failure()
                );
                history.push(error);
                return Err(GiveUp {
                    reason: if terminal {
                        GiveUpReason::Terminal
                    } else {
                        GiveUpReason::Exhausted
                    },
                    history,
                    attempts: attempt,
                });
            }

            let jitter = rand::thread_rng().gen_range(0.5..=1.0);
            let backoff = self.backoff(attempt - 1, &error, jitter);
            let ctx = RetryContext::new(
                attempt + 1,
                max_attempts,
                &error,
                backoff,
                request.offset,
                request.count,
            );
            warn!(
                error_class = class.as_str(),
                error = %error,
                backoff_ms = backoff.as_millis() as u64,
                "{}",
                ctx.format_retry()
            );
            record_retry_backoff(backoff, attempt, class.as_str());
            history.push(error);

            if !sleep_or_shutdown(backoff, shutdown).await {
                return Err(GiveUp {
                    reason: GiveUpReason::Interrupted,
                    history,
                    attempts: attempt,
                });
            }
        }

        // The loop always returns on its final attempt
        Err(GiveUp {
            reason: GiveUpReason::Exhausted,
            history,
            attempts: max_attempts,
        })
    }
}
