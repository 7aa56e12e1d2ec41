//! Pacing between page requests
//!
//! The controller only decides; the driver sleeps. Pacing grows slowly with
//! the number of batches, takes a long break on a fixed cadence, and
//! escalates multiplicatively whenever the provider throttles us. A
//! throttling event changes the steady-state delay for every following
//! batch, not only the retry inside the current one.

use super::config::PacingConfig;
use crate::fetcher::{FetchError, FetchErrorClass};
use rand::Rng;
use std::time::Duration;

/// What happened to one fetch attempt, as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Batch fetched and persisted
    Success,
    /// Provider throttled the request
    RateLimited,
    /// Timeout, reset, 5xx
    TransientFailure,
    /// Malformed response
    FormatFailure,
}

impl BatchOutcome {
    /// Outcome for a classified fetch failure
    pub fn from_error(error: &FetchError) -> Self {
        match error.class() {
            FetchErrorClass::RateLimit => Self::RateLimited,
            FetchErrorClass::Format => Self::FormatFailure,
            FetchErrorClass::TransientNetwork | FetchErrorClass::Auth | FetchErrorClass::Fatal => {
                Self::TransientFailure
            }
        }
    }
}

/// Transient pacing state; lives for one process only
#[derive(Debug, Clone, PartialEq)]
pub struct RateState {
    /// Successful batches since process start
    pub consecutive_batches: u64,
    /// Failed attempts since the last success
    pub consecutive_failures: u32,
    /// Successful batches since the last rate limit
    pub consecutive_successes: u32,
    /// Rate-limit multiplier, 1.0 when calm
    pub escalation: f64,
    /// Nominal delay before the next request, without jitter or cooldown
    pub current_delay: Duration,
}

/// Delay to apply before the next request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingDecision {
    /// Jittered pacing delay
    pub delay: Duration,
    /// Extra long break, on the cooldown cadence
    pub cooldown: Option<Duration>,
}

impl PacingDecision {
    /// Total time to wait
    pub fn total(&self) -> Duration {
        self.delay + self.cooldown.unwrap_or(Duration::ZERO)
    }

    /// Whether this decision includes a cooldown
    pub fn is_cooldown(&self) -> bool {
        self.cooldown.is_some()
    }
}

/// Pure pacing decisions
#[derive(Debug, Clone)]
pub struct RateController {
    config: PacingConfig,
}

impl RateController {
    /// Controller with the given pacing parameters
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    /// Pacing parameters
    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Conservative baseline state for a new process
    pub fn initial_state(&self) -> RateState {
        RateState {
            consecutive_batches: 0,
            consecutive_failures: 0,
            consecutive_successes: 0,
            escalation: 1.0,
            current_delay: self.config.base_delay.min(self.config.max_delay),
        }
    }

    /// Delay before the next request.
    ///
    /// `current_delay` scaled by a jitter factor from the configured range,
    /// capped at the configured ceiling, plus a cooldown when the number of
    /// completed batches is a positive multiple of the cadence.
    pub fn next_delay<R: Rng + ?Sized>(&self, state: &RateState, rng: &mut R) -> PacingDecision {
        let (low, high) = self.config.jitter;
        let jitter = if high > low {
            rng.gen_range(low..=high)
        } else {
            low
        };
        let delay = state
            .current_delay
            .mul_f64(jitter.max(0.0))
            .min(self.config.max_delay);

        let cooldown = (self.config.cooldown_every > 0
            && state.consecutive_batches > 0
            && state.consecutive_batches % self.config.cooldown_every == 0
            && !self.config.cooldown.is_zero())
        .then_some(self.config.cooldown);

        PacingDecision { delay, cooldown }
    }

    /// Fold one outcome into the state
    pub fn observe(&self, mut state: RateState, outcome: BatchOutcome) -> RateState {
        match outcome {
            BatchOutcome::Success => {
                state.consecutive_batches += 1;
                state.consecutive_failures = 0;
                state.consecutive_successes = state.consecutive_successes.saturating_add(1);
                if state.escalation > 1.0
                    && state.consecutive_successes >= self.config.reset_after_successes
                {
                    state.escalation = 1.0;
                }
            }
            BatchOutcome::RateLimited => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.consecutive_successes = 0;
                state.escalation = (state.escalation * self.config.escalation)
                    .min(self.escalation_ceiling());
            }
            BatchOutcome::TransientFailure | BatchOutcome::FormatFailure => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                state.consecutive_successes = 0;
            }
        }
        state.current_delay = self.nominal_delay(&state);
        state
    }

    fn progressive_multiplier(&self, batches: u64) -> f64 {
        let steps = batches / self.config.progressive_step.max(1);
        1.0 + steps as f64 * self.config.progressive_factor
    }

    // Past this factor every delay is clamped to the ceiling anyway
    fn escalation_ceiling(&self) -> f64 {
        let base = self.config.base_delay.as_secs_f64();
        if base > 0.0 {
            (self.config.max_delay.as_secs_f64() / base).max(1.0)
        } else {
            1.0
        }
    }

    fn nominal_delay(&self, state: &RateState) -> Duration {
        let factor = self.progressive_multiplier(state.consecutive_batches) * state.escalation;
        self.config
            .base_delay
            .mul_f64(factor)
            .min(self.config.max_delay)
    }
}

impl Default for RateController {
    fn default() -> Self {
        Self::new(PacingConfig::default())
    }
}
