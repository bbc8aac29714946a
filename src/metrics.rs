//! Observability metrics for backup runs
//!
//! Counters and histograms for outbound requests, retries, rate-limiter waits
//! and entity writes. Recording is always on and cheap; an exporter is only
//! installed when the CLI is given `--metrics-addr`.
//!
//! ## Architecture
//!
//! - Uses the `metrics` crate facade, so recording without an installed
//!   recorder is a no-op
//! - Optional Prometheus exporter serving a scrape endpoint

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::Category;

static METRICS_INSTALLED: OnceCell<SocketAddr> = OnceCell::new();

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors from installing the exporter
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed
    #[error("failed to install Prometheus exporter: {0}")]
    Install(String),
}

/// Install the Prometheus exporter on `addr`
///
/// Idempotent: a second call is a no-op returning `Ok`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    if let Some(existing) = METRICS_INSTALLED.get() {
        debug!(%existing, "Prometheus exporter already listening");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_counter!(
        "api_requests_total",
        Unit::Count,
        "Total number of requests sent to the Backlog API"
    );
    describe_counter!(
        "api_rate_limited_total",
        Unit::Count,
        "Total number of 429 responses received"
    );
    describe_counter!(
        "api_retries_total",
        Unit::Count,
        "Requests re-sent after a 429, 5xx or transport error"
    );
    describe_histogram!(
        "api_request_duration_seconds",
        Unit::Seconds,
        "Request duration in seconds"
    );
    describe_histogram!(
        "rate_limiter_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a rate limiter slot"
    );
    describe_counter!(
        "scrape_navigations_total",
        Unit::Count,
        "Total number of browser page transitions"
    );
    describe_counter!(
        "entities_written_total",
        Unit::Count,
        "Entities written to the backup directory"
    );
    describe_counter!(
        "entities_failed_total",
        Unit::Count,
        "Entities skipped after an unrecoverable fetch or write failure"
    );

    let _ = METRICS_INSTALLED.set(addr);
    info!(%addr, "Serving Prometheus metrics");
    Ok(())
}

/// Check if the exporter is installed
pub fn is_initialized() -> bool {
    METRICS_INSTALLED.get().is_some()
}

/// Process-unique id attached to every log line of one request attempt
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome of one API request attempt
pub struct HttpRequestMetrics {
    endpoint: String,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl HttpRequestMetrics {
    /// Start recording a new request
    pub fn start(endpoint: impl Into<String>, attempt: u32) -> Self {
        Self {
            endpoint: endpoint.into(),
            start_time: Instant::now(),
            correlation_id: generate_correlation_id(),
            attempt,
        }
    }

    fn count(&self, status: String) {
        counter!(
            "api_requests_total",
            "endpoint" => self.endpoint.clone(),
            "status" => status,
        )
        .increment(1);
    }

    /// Response received with `status_code`
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();
        self.count(status_code.to_string());
        histogram!(
            "api_request_duration_seconds",
            "endpoint" => self.endpoint.clone(),
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            counter!("api_rate_limited_total", "endpoint" => self.endpoint.clone()).increment(1);
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = %self.endpoint,
                attempt = self.attempt,
                "Backlog answered 429"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            status = status_code,
            elapsed_ms = duration.as_millis() as u64,
            "Request finished"
        );
    }

    /// No response: the request failed in transport
    pub fn record_network_error(&self) {
        self.count("network_error".to_string());
        debug!(
            correlation_id = %self.correlation_id,
            endpoint = %self.endpoint,
            attempt = self.attempt,
            "Request failed before a response"
        );
    }

    /// Correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record a retry and its backoff
pub fn record_retry_backoff(duration: Duration, reason: &'static str) {
    counter!("api_retries_total", "reason" => reason).increment(1);
    debug!(
        reason,
        backoff_ms = duration.as_millis() as u64,
        "Backing off"
    );
}

/// Record a browser page transition
pub fn record_navigation() {
    counter!("scrape_navigations_total").increment(1);
}

/// Rate limiter metrics helper
pub struct RateLimiterMetrics;

impl RateLimiterMetrics {
    /// Record how long a caller waited for its slot
    pub fn record_wait(waited: Duration) {
        histogram!("rate_limiter_wait_seconds").record(waited.as_secs_f64());
    }
}

/// Per-category entity counters
pub struct EntityMetrics;

impl EntityMetrics {
    /// Count an entity written to disk
    pub fn record_written(category: Category) {
        counter!("entities_written_total", "category" => category.dir_name()).increment(1);
    }

    /// Count an entity skipped after a failure
    pub fn record_failed(category: Category) {
        counter!("entities_failed_total", "category" => category.dir_name()).increment(1);
    }
}
