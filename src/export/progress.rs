//! Progress reporting for long exports.
//!
//! Emits periodic "[PROGRESS]" lines with the article rate and, when the run
//! has a cap, the completion percentage and an ETA.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_BATCH_STEP: u64 = 10;

/// Controls update cadence.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    update_interval: Duration,
    batch_step: u64,
    min_percentage_step: f64,
}

impl ProgressTracker {
    /// Tracker that reports every `update_interval`, every `batch_step`
    /// batches, or whenever the percentage moved by `min_percentage_step`.
    pub fn new(update_interval: Duration, batch_step: u64, min_percentage_step: f64) -> Self {
        Self {
            update_interval,
            batch_step: batch_step.max(1),
            min_percentage_step,
        }
    }

    /// Build a [`ProgressState`] for a run that already holds `resumed_from` articles.
    pub fn create_state(&self, cap: Option<u64>, resumed_from: u64) -> ProgressState {
        let mut state = ProgressState::new(cap, resumed_from);
        state.update_interval = self.update_interval;
        state.batch_step = self.batch_step;
        state.min_percentage_step = self.min_percentage_step;
        state
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL, DEFAULT_BATCH_STEP, 10.0)
    }
}

/// Progress of one export run.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Articles fetched by this run
    pub articles_this_run: u64,
    /// Offset the run started from
    pub resumed_from: u64,
    /// Run cap, if any
    pub cap: Option<u64>,
    /// Batches persisted by this run
    pub batches: u64,
    /// When the run started
    pub start_time: Instant,
    /// Last time progress was reported
    pub last_update: Instant,
    /// Minimum interval between time-based updates
    pub update_interval: Duration,
    /// Batches between updates
    pub batch_step: u64,
    /// Articles per second over the run
    pub current_rate: f64,
    /// Percentage at the last report
    pub last_reported_percentage: f64,
    /// Percentage delta that forces a report
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// State with default cadence.
    pub fn new(cap: Option<u64>, resumed_from: u64) -> Self {
        let now = Instant::now();
        Self {
            articles_this_run: 0,
            resumed_from,
            cap,
            batches: 0,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            batch_step: DEFAULT_BATCH_STEP,
            current_rate: 0.0,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        }
    }

    /// Record a persisted batch.
    pub fn update(&mut self, articles: u64) {
        self.articles_this_run = self.articles_this_run.saturating_add(articles);
        self.batches += 1;
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.current_rate = self.articles_this_run as f64 / elapsed;
        }
    }

    /// Resume offset after the persisted batches
    pub fn offset(&self) -> u64 {
        self.resumed_from + self.articles_this_run
    }

    /// Whether a progress line is due.
    pub fn should_emit_update(&self) -> bool {
        if self.batches == 0 {
            return false;
        }
        if self.batches % self.batch_step == 0 {
            return true;
        }
        let percentage_jump = self
            .percentage()
            .map(|pct| pct - self.last_reported_percentage >= self.min_percentage_step)
            .unwrap_or(false);
        percentage_jump || self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress line.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Completion percentage (0-100), only known when capped.
    pub fn percentage(&self) -> Option<f64> {
        let cap = self.cap?;
        if cap == 0 {
            return Some(100.0);
        }
        Some((self.articles_this_run as f64 / cap as f64 * 100.0).min(100.0))
    }

    /// Time left until the cap, at the current rate.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        let cap = self.cap?;
        if self.current_rate <= 0.0 {
            return None;
        }
        let remaining = cap.saturating_sub(self.articles_this_run);
        (remaining > 0).then(|| Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress line.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] Exported {} articles (offset {}, batch {})",
            self.articles_this_run,
            self.offset(),
            self.batches
        )];

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% of cap"));
        }

        if self.current_rate > 0.0 {
            parts.push(format!("at {:.1} articles/sec", self.current_rate));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

/// Compact duration for progress and summaries ("45s", "12m", "1.5h").
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
