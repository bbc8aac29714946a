//! Backup configuration constants

use std::time::Duration;

/// Minimum spacing between two outbound requests, API or browser.
pub const REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// Retries after a rate-limit (429) response before giving up on the request.
pub const MAX_RATE_LIMIT_RETRIES: u32 = 5;

/// Retries after a timeout, connection failure or 5xx response.
pub const MAX_TRANSIENT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds. Also caps honored `Retry-After` values.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Page size for offset- and cursor-paginated listings.
pub const PAGE_SIZE: usize = 100;

/// Default number of item fetches dispatched concurrently within a category.
pub const DEFAULT_ITEM_CONCURRENCY: usize = 4;

/// Upper bound for the item concurrency option.
pub const MAX_ITEM_CONCURRENCY: usize = 16;

/// Timeout for a single git/svn invocation.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for a single HTTP request, body included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Navigation and selector wait timeout for the browser session.
pub const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    RetryPolicy::default().backoff(retry_count)
}

/// Retry bounds and backoff schedule for a single HTTP request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after rate-limit responses
    pub max_rate_limit_retries: u32,
    /// Retries allowed after transient network failures
    pub max_transient_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Ceiling for every delay
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Policy with a custom rate-limit retry bound (from `--max-retries`)
    pub fn with_max_rate_limit_retries(mut self, retries: u32) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    /// Delay before retry number `retry_count` (0-based): `initial * 2^n`, capped
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Rate-limit delay, raised to the server's `Retry-After` hint when larger
    pub fn rate_limit_backoff(&self, retry_count: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self.backoff(retry_count);
        match retry_after {
            Some(hint) if hint > computed => hint.min(self.max_backoff),
            _ => computed,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: MAX_RATE_LIMIT_RETRIES,
            max_transient_retries: MAX_TRANSIENT_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
        }
    }
}
