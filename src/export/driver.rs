//! Export driver
//!
//! `INIT -> FETCHING -> PERSISTING -> (FETCHING | COMPLETE | FAILED)`
//!
//! The checkpoint only moves after a page is in both stores, so any failure
//! while fetching loses nothing. Interrupts are honoured at suspension
//! points and never between a store write and its checkpoint.

use super::config::{ExportConfig, MAX_BATCHES};
use super::progress::{format_duration, ProgressTracker};
use super::rate_limit::{BatchOutcome, RateController};
use super::retry::{GiveUpReason, RetryPolicy};
use super::ExportError;
use crate::checkpoint::{CheckpointStore, ExportState, RunLock};
use crate::credential::{Credential, CredentialProvider};
use crate::fetcher::{ArticleSource, FetchErrorClass, PageRequest};
use crate::metrics::{record_pacing_delay, ExportMetrics};
use crate::normalize::{Normalize, PocketNormalizer};
use crate::shutdown::{sleep_or_shutdown, SharedShutdown};
use crate::storage::FileSummary;
use crate::ArticleRecord;
use indicatif::ProgressBar;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportStatus {
    /// Provider has no more pages, or the run cap was reached
    Complete,
    /// Terminal error; the last saved checkpoint is intact
    Failed {
        /// Stable error class label
        class: &'static str,
        /// Error message
        message: String,
    },
    /// Operator interrupt between suspensions
    Interrupted,
}

impl ExportStatus {
    fn from_error(error: &ExportError) -> Self {
        if error.is_interrupt() {
            return Self::Interrupted;
        }
        Self::Failed {
            class: error.class(),
            message: error.to_string(),
        }
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Complete => 0,
            Self::Failed { .. } => 1,
            Self::Interrupted => 130,
        }
    }

    /// Error class, if the run did not complete
    pub fn class(&self) -> Option<&'static str> {
        match self {
            Self::Complete => None,
            Self::Failed { class, .. } => Some(*class),
            Self::Interrupted => Some("interrupted"),
        }
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete => f.write_str("COMPLETE"),
            Self::Failed { class, .. } => write!(f, "FAILED ({class})"),
            Self::Interrupted => f.write_str("INTERRUPTED"),
        }
    }
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    /// How the run ended
    #[serde(flatten)]
    pub status: ExportStatus,
    /// Last durable checkpoint
    pub state: ExportState,
    /// Offset the run started from
    pub resumed_from: u64,
    /// Batches persisted by this run
    pub batches: u64,
    /// Articles persisted by this run
    pub articles_this_run: u64,
    /// Rate-limit responses seen by this run
    pub rate_limit_events: u64,
    /// Failed attempts that were retried
    pub retries: u64,
    /// The run stopped at the article cap
    pub capped: bool,
    /// Wall time of the run in seconds
    pub elapsed_secs: f64,
    /// Raw store summary at the end of the run
    pub raw_file: Option<FileSummary>,
    /// Normalized store summary at the end of the run
    pub normalized_file: Option<FileSummary>,
}

impl ExportReport {
    /// Whether the run completed
    pub fn is_complete(&self) -> bool {
        self.status == ExportStatus::Complete
    }

    /// Offset a future run resumes from
    pub fn resume_offset(&self) -> u64 {
        self.state.offset
    }
}

/// Counters kept while the loop runs
#[derive(Debug, Default)]
struct RunCounters {
    batches: u64,
    articles: u64,
    rate_limit_events: u64,
    retries: u64,
    capped: bool,
}

/// Drives one export run
pub struct ExportDriver<S: ArticleSource> {
    source: S,
    credential: Credential,
    config: ExportConfig,
    normalizer: Box<dyn Normalize>,
    shutdown: Option<SharedShutdown>,
    progress_tracker: ProgressTracker,
    progress_bar: Option<ProgressBar>,
    rng: StdRng,
}

impl<S: ArticleSource> ExportDriver<S> {
    /// Driver for `source` with a validated credential
    pub fn new(source: S, credential: Credential, config: ExportConfig) -> Self {
        Self {
            source,
            credential,
            config,
            normalizer: Box::new(PocketNormalizer),
            shutdown: None,
            progress_tracker: ProgressTracker::default(),
            progress_bar: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Driver whose credential comes from `provider`, consulted once
    pub fn from_provider(
        source: S,
        provider: &dyn CredentialProvider,
        config: ExportConfig,
    ) -> Result<Self, ExportError> {
        let credential = provider.get_credential()?;
        Ok(Self::new(source, credential, config))
    }

    /// Replace the normalizer
    pub fn with_normalizer<N: Normalize + 'static>(mut self, normalizer: N) -> Self {
        self.normalizer = Box::new(normalizer);
        self
    }

    /// Attach a shared shutdown handle for graceful cancellation.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Override progress reporting cadence.
    pub fn with_progress_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.progress_tracker = tracker;
        self
    }

    /// Drive an indicatif bar or spinner from the loop.
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress_bar = Some(bar);
        self
    }

    /// Fix the jitter seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run configuration
    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Run the export until it completes, fails or is interrupted.
    ///
    /// # Errors
    /// Only for problems before the first fetch: invalid configuration,
    /// another run holding the lock, an unreadable checkpoint or a listing
    /// that differs from the checkpoint's. Everything later is reported
    /// through [`ExportReport::status`].
    pub async fn run(&mut self) -> Result<ExportReport, ExportError> {
        let span = info_span!(
            "export",
            output_dir = %self.config.output_dir.display(),
            endpoint = self.source.endpoint()
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&mut self) -> Result<ExportReport, ExportError> {
        // INIT
        self.config.validate()?;
        let paths = self.config.paths.clone();
        let mut lock = RunLock::open(paths.state.with_extension("lock"))?;
        let _guard = lock.try_hold()?;

        if self.config.fresh {
            info!("Fresh export requested - discarding previous progress");
            CheckpointStore::reset(&paths)?;
        }

        let mut store = CheckpointStore::open(paths)?;
        let checkpoint = store.load_state()?;
        if let Some(saved) = &checkpoint {
            if saved.state_filter != self.config.state_filter || saved.detail != self.config.detail
            {
                return Err(ExportError::ListingMismatch {
                    checkpoint_state: saved.state_filter,
                    checkpoint_detail: saved.detail,
                    requested_state: self.config.state_filter,
                    requested_detail: self.config.detail,
                });
            }
        }

        let mut state = match (self.config.resume_from, checkpoint) {
            (Some(offset), Some(mut saved)) => {
                if offset > saved.stored_articles {
                    warn!(
                        resume_from = offset,
                        stored_articles = saved.stored_articles,
                        "Explicit offset is past the stored articles; the gap will not be exported"
                    );
                }
                info!(
                    resume_from = offset,
                    checkpoint_offset = saved.offset,
                    "Overriding checkpoint offset"
                );
                saved.offset = offset;
                saved.completed_at = None;
                saved
            }
            (Some(offset), None) => {
                info!(resume_from = offset, "Starting at explicit offset");
                ExportState::starting_at(offset, self.config.state_filter, self.config.detail)
            }
            (None, Some(saved)) if saved.is_complete() => {
                info!(
                    offset = saved.offset,
                    "Export already complete; use --fresh to start over"
                );
                let offset = saved.offset;
                return Ok(self.report(
                    ExportStatus::Complete,
                    saved,
                    offset,
                    RunCounters::default(),
                    &store,
                    0.0,
                ));
            }
            (None, Some(saved)) => {
                info!(
                    offset = saved.offset,
                    batch_index = saved.batch_index,
                    "Resuming from checkpoint"
                );
                saved
            }
            (None, None) => {
                info!("No checkpoint found - starting at offset 0");
                ExportState::new(self.config.state_filter, self.config.detail)
            }
        };

        let resumed_from = state.offset;
        let metrics = ExportMetrics::start();
        let mut counters = RunCounters::default();

        let result = self
            .export_loop(&mut store, &mut state, &mut counters, &metrics)
            .await;

        let status = match &result {
            Ok(()) => {
                metrics.record_success(state.total_fetched);
                ExportStatus::Complete
            }
            Err(e) => {
                let status = ExportStatus::from_error(e);
                if let Some(class) = status.class() {
                    metrics.record_failure(class);
                }
                status
            }
        };

        if let Some(bar) = &self.progress_bar {
            bar.finish_and_clear();
        }

        let elapsed = metrics.elapsed();
        let report = self.report(
            status,
            state,
            resumed_from,
            counters,
            &store,
            elapsed.as_secs_f64(),
        );
        log_summary(&report, result.err().as_ref(), elapsed);
        Ok(report)
    }

    async fn export_loop(
        &mut self,
        store: &mut CheckpointStore,
        state: &mut ExportState,
        counters: &mut RunCounters,
        metrics: &ExportMetrics,
    ) -> Result<(), ExportError> {
        let controller = RateController::new(self.config.pacing.clone());
        let retry = RetryPolicy::new(self.config.retry.clone());
        let mut rate_state = controller.initial_state();
        let mut progress = self
            .progress_tracker
            .create_state(self.config.max_articles, state.offset);
        if let (Some(bar), Some(cap)) = (&self.progress_bar, self.config.max_articles) {
            bar.set_length(cap);
        }

        let shutdown = self.shutdown.clone();
        let shutdown = shutdown.as_deref();

        loop {
            if counters.batches >= MAX_BATCHES {
                return Err(ExportError::BatchLimit(counters.batches));
            }
            if shutdown.is_some_and(|s| s.is_shutdown_requested()) {
                return Err(ExportError::Interrupted);
            }

            let count = self.config.next_count(counters.articles);
            if count == 0 {
                counters.capped = true;
                return Ok(());
            }

            // FETCHING
            let pacing = controller.next_delay(&rate_state, &mut self.rng);
            if let Some(cooldown) = pacing.cooldown {
                info!(
                    batches = rate_state.consecutive_batches,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "Taking a break to stay under the rate budget"
                );
            }
            debug!(
                delay_ms = pacing.total().as_millis() as u64,
                "Pacing before next request"
            );
            record_pacing_delay(pacing.total(), pacing.is_cooldown());
            if !sleep_or_shutdown(pacing.total(), shutdown).await {
                return Err(ExportError::Interrupted);
            }

            let request = PageRequest::new(
                state.offset,
                count,
                self.config.state_filter,
                self.config.detail,
            );
            let batch_span = info_span!(
                "batch",
                index = state.batch_index + 1,
                offset = state.offset
            );

            let source = &self.source;
            let credential = &self.credential;
            let req = &request;
            let outcome = retry
                .with_retry(req, shutdown, move || source.fetch_page(req, credential))
                .instrument(batch_span.clone())
                .await;

            let retried = match outcome {
                Ok(retried) => retried,
                Err(give_up) => {
                    counters.retries += give_up.history.len().saturating_sub(1) as u64;
                    counters.rate_limit_events += give_up
                        .history
                        .iter()
                        .filter(|e| e.class() == FetchErrorClass::RateLimit)
                        .count() as u64;
                    if give_up.reason == GiveUpReason::Interrupted {
                        return Err(ExportError::Interrupted);
                    }
                    return Err(give_up.into());
                }
            };

            for failure in &retried.failures {
                if failure.class() == FetchErrorClass::RateLimit {
                    counters.rate_limit_events += 1;
                    warn!(
                        offset = request.offset,
                        "Rate limited - slowing steady-state pacing"
                    );
                }
                rate_state = controller.observe(rate_state, BatchOutcome::from_error(failure));
            }
            counters.retries += retried.failures.len() as u64;
            let batch = retried.batch;

            // PERSISTING
            let finished = batch_span.in_scope(|| -> Result<bool, ExportError> {
                if batch.is_empty() {
                    info!("Provider returned an empty page - export complete");
                    state.finalize();
                    store.save_state(state)?;
                    return Ok(true);
                }

                let records: Vec<ArticleRecord> = batch
                    .articles
                    .iter()
                    .map(|raw| self.normalizer.normalize(raw))
                    .collect();
                let stats = store.persist_batch(&batch, &records)?;

                state.advance(batch.len() as u64, stats.stored);
                counters.batches += 1;
                counters.articles += batch.len() as u64;
                let capped = self
                    .config
                    .max_articles
                    .is_some_and(|cap| counters.articles >= cap);

                // Only the completion indicator ends the run, never a short page
                let done = batch.complete;
                if done {
                    state.finalize();
                }
                store.save_state(state)?;

                info!(
                    articles = batch.len(),
                    offset = state.offset,
                    total_fetched = state.total_fetched,
                    stored = stats.stored,
                    attempts = retried.attempts,
                    "Batch persisted"
                );

                if done {
                    info!(
                        short_page = batch.len() < request.count as usize,
                        "Provider reported no more pages"
                    );
                } else if capped {
                    counters.capped = true;
                    info!(max_articles = counters.articles, "Article cap reached");
                }
                Ok(done || capped)
            })?;

            rate_state = controller.observe(rate_state, BatchOutcome::Success);
            if !batch.is_empty() {
                metrics.record_batch(batch.len());
                progress.update(batch.len() as u64);
                if let Some(bar) = &self.progress_bar {
                    bar.inc(batch.len() as u64);
                    bar.set_message(format!("offset {}", state.offset));
                }
                if progress.should_emit_update() {
                    info!("{}", progress.format_progress());
                    progress.mark_emitted();
                }
            }

            if finished {
                return Ok(());
            }
        }
    }

    fn report(
        &self,
        status: ExportStatus,
        state: ExportState,
        resumed_from: u64,
        counters: RunCounters,
        store: &CheckpointStore,
        elapsed_secs: f64,
    ) -> ExportReport {
        let (raw_file, normalized_file) = match store.summaries() {
            Ok((raw, normalized)) => (Some(raw), Some(normalized)),
            Err(e) => {
                warn!(error = %e, "Could not summarize store files");
                (None, None)
            }
        };
        ExportReport {
            status,
            state,
            resumed_from,
            batches: counters.batches,
            articles_this_run: counters.articles,
            rate_limit_events: counters.rate_limit_events,
            retries: counters.retries,
            capped: counters.capped,
            elapsed_secs,
            raw_file,
            normalized_file,
        }
    }
}

fn log_summary(report: &ExportReport, error: Option<&ExportError>, elapsed: std::time::Duration) {
    match &report.status {
        ExportStatus::Complete => info!(
            total_fetched = report.state.total_fetched,
            offset = report.state.offset,
            batches = report.batches,
            articles_this_run = report.articles_this_run,
            capped = report.capped,
            elapsed = %format_duration(elapsed),
            "Export finished"
        ),
        ExportStatus::Failed { class, message } => error!(
            error_class = class,
            error = %message,
            total_fetched = report.state.total_fetched,
            resume_offset = report.state.offset,
            batches = report.batches,
            elapsed = %format_duration(elapsed),
            "Export failed - rerun to resume from the last checkpoint"
        ),
        ExportStatus::Interrupted => warn!(
            total_fetched = report.state.total_fetched,
            resume_offset = report.state.offset,
            batches = report.batches,
            "Export interrupted - progress saved"
        ),
    }
    if let Some(e) = error {
        debug!(error = ?e, "Run ended with error");
    }
    for summary in [&report.raw_file, &report.normalized_file].into_iter().flatten() {
        info!("{summary}");
    }
}
