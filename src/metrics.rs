//! Export observability metrics
//!
//! Counters and histograms for provider requests, throttling, retries,
//! pacing delays and persisted batches. Emission goes through the `metrics`
//! facade, so without an installed recorder every call is a no-op.
//!
//! ## Architecture
//!
//! - `metrics` crate macros at the call sites
//! - Optional Prometheus scrape endpoint via [`init_metrics`]

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Global metrics initialization flag
static METRICS_INITIALIZED: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(false));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize the Prometheus exporter.
///
/// Idempotent; a second call is a no-op.
///
/// # Arguments
/// * `addr` - Socket address for the scrape endpoint (e.g., "127.0.0.1:9090")
///
/// # Errors
/// Returns an error if the listener cannot be installed.
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.lock().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "pocket_requests_total",
        Unit::Count,
        "Total number of page requests sent to the provider"
    );
    describe_histogram!(
        "pocket_request_duration_seconds",
        Unit::Seconds,
        "Page request duration in seconds"
    );
    describe_counter!(
        "pocket_rate_limited_total",
        Unit::Count,
        "Total number of rate limit responses received"
    );
    describe_gauge!(
        "pocket_user_quota_remaining",
        Unit::Count,
        "Remaining per-user request quota reported by the provider"
    );
    describe_counter!(
        "export_retries_total",
        Unit::Count,
        "Total number of retry attempts by error class"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );
    describe_histogram!(
        "pacing_delay_seconds",
        Unit::Seconds,
        "Pre-fetch pacing delay in seconds"
    );
    describe_counter!(
        "export_cooldowns_total",
        Unit::Count,
        "Total number of periodic cooldown pauses"
    );
    describe_counter!(
        "batches_persisted_total",
        Unit::Count,
        "Total number of batches durably persisted"
    );
    describe_counter!(
        "articles_persisted_total",
        Unit::Count,
        "Total number of articles durably persisted"
    );
    describe_counter!(
        "exports_completed_total",
        Unit::Count,
        "Total number of export runs that completed"
    );
    describe_counter!(
        "exports_failed_total",
        Unit::Count,
        "Total number of export runs that failed"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome of one provider request
pub struct RequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
}

impl RequestMetrics {
    /// Start recording a request
    pub fn start(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            endpoint = %endpoint,
            "Starting request metrics"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    /// Record a response with an HTTP status
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "pocket_requests_total",
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!("pocket_request_duration_seconds").record(duration.as_secs_f64());

        if status_code == 429 {
            counter!("pocket_rate_limited_total").increment(1);
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                duration_ms = duration.as_millis(),
                "Rate limit response (429) recorded"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            status = status_code,
            duration_ms = duration.as_millis(),
            "Request completed"
        );
    }

    /// Record a network failure (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "pocket_requests_total",
            "status" => "network_error",
        )
        .increment(1);

        histogram!("pocket_request_duration_seconds").record(duration.as_secs_f64());

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Correlation ID of this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record one retry backoff
pub fn record_retry_backoff(duration: Duration, attempt: u32, class: &'static str) {
    counter!(
        "export_retries_total",
        "class" => class,
    )
    .increment(1);

    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        class = class,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record a pre-fetch pacing delay
pub fn record_pacing_delay(delay: Duration, cooldown: bool) {
    histogram!("pacing_delay_seconds").record(delay.as_secs_f64());
    if cooldown {
        counter!("export_cooldowns_total").increment(1);
    }
}

/// Record provider-reported user quota
pub fn record_user_quota(remaining: u32, limit: Option<u32>) {
    gauge!("pocket_user_quota_remaining").set(remaining as f64);

    if let Some(limit) = limit.filter(|l| *l > 0) {
        let used_percent = (1.0 - remaining as f64 / limit as f64) * 100.0;
        if used_percent >= 90.0 {
            warn!(
                remaining = remaining,
                limit = limit,
                used_percent = used_percent,
                "User request quota nearly exhausted"
            );
        }
    }
}

/// Export run metrics
pub struct ExportMetrics {
    start_time: Instant,
}

impl Default for ExportMetrics {
    fn default() -> Self {
        Self::start()
    }
}

impl ExportMetrics {
    /// Start tracking a run
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    /// Record a persisted batch
    pub fn record_batch(&self, articles: usize) {
        counter!("batches_persisted_total").increment(1);
        counter!("articles_persisted_total").increment(articles as u64);
    }

    /// Record a completed run
    pub fn record_success(&self, total_fetched: u64) {
        counter!("exports_completed_total").increment(1);
        info!(
            total_fetched = total_fetched,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Export run completed"
        );
    }

    /// Record a failed run
    pub fn record_failure(&self, class: &'static str) {
        counter!(
            "exports_failed_total",
            "class" => class,
        )
        .increment(1);
        warn!(
            class = class,
            duration_secs = self.start_time.elapsed().as_secs(),
            "Export run failed"
        );
    }

    /// Time since the run started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
