//! Retry message formatting
//!
//! Builds consistent, operator-facing log lines for retries and for the
//! final failure summary, with remediation hints per error class.

use crate::fetcher::{FetchError, FetchErrorClass};
use std::time::Duration;

impl FetchErrorClass {
    /// User-friendly description used inside retry messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Auth => "authentication failed",
            Self::RateLimit => "rate limit exceeded",
            Self::TransientNetwork => "network error",
            Self::Format => "unexpected response format",
            Self::Fatal => "unexpected error",
        }
    }

    /// Suggested remediation shown after a failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Auth => "Re-authenticate and update POCKET_CONSUMER_KEY / POCKET_ACCESS_TOKEN",
            Self::RateLimit => "Wait for the quota window to reset, then resume; consider a larger --base-delay",
            Self::TransientNetwork => "Check network connectivity, then resume",
            Self::Format => "The provider response changed shape; inspect the run log before resuming",
            Self::Fatal => "Inspect the run log; resume once the cause is fixed",
        }
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Class of the error that triggered the retry
    pub class: FetchErrorClass,
    /// Backoff duration until the next attempt
    pub backoff_duration: Duration,
    /// Page offset being fetched
    pub offset: u64,
    /// Page size being fetched
    pub count: u32,
    /// Original error message
    pub error_message: String,
}

impl RetryContext {
    /// Context for a failed attempt on the page at `offset`.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error: &FetchError,
        backoff_duration: Duration,
        offset: u64,
        count: u32,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            class: error.class(),
            backoff_duration,
            offset,
            count,
            error_message: error.to_string(),
        }
    }

    /// Standardized retry message with attempt counters and page range.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... (offset {}, count {})",
            self.attempt,
            self.max_attempts,
            self.class.description(),
            self.backoff_duration.as_secs_f64(),
            self.offset,
            self.count
        )
    }

    /// Message when a retried page eventually succeeds.
    pub fn format_success(&self) -> String {
        format!(
            "Retry attempt {}/{} succeeded - resuming export (offset {})",
            self.attempt, self.max_attempts, self.offset
        )
    }

    /// Final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!("[FAILED] Page fetch failed after {} attempts", self.attempt),
            format!("  Last error: {}", self.error_message),
            format!("  Page: offset {} count {}", self.offset, self.count),
            format!("  Resume with: --resume-from {}", self.offset),
            "  Suggestions:".to_string(),
        ];

        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }

        lines.join("\n")
    }

    /// Suggestions tailored to this context.
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.class.suggestion().to_string()];
        if matches!(
            self.class,
            FetchErrorClass::TransientNetwork | FetchErrorClass::RateLimit
        ) {
            suggestions.push(format!(
                "Try increasing --max-retries (current: {})",
                self.max_attempts.saturating_sub(1)
            ));
        }
        suggestions
    }
}
