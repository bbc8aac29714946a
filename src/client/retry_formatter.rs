//! Log lines for HTTP retries
//!
//! Only retryable failures get here: 429, 5xx and transport errors. Everything
//! else is mapped straight to a [`FetcherError`](crate::client::FetcherError).

use reqwest::{Error as ReqwestError, StatusCode};
use std::fmt;
use std::time::Duration;

/// Why a request is being retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// 429, with the server's `Retry-After` hint if it sent one
    RateLimited {
        /// Hinted delay
        retry_after: Option<Duration>,
    },
    /// 5xx response
    Server(u16),
    /// Request or connect timeout
    Timeout,
    /// Connection refused or DNS failure
    Connect,
    /// Any other transport error
    Network,
}

impl RetryReason {
    /// Reason for a retryable status, `None` for anything else
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>) -> Option<Self> {
        if status == StatusCode::TOO_MANY_REQUESTS {
            Some(Self::RateLimited { retry_after })
        } else if status.is_server_error() {
            Some(Self::Server(status.as_u16()))
        } else {
            None
        }
    }

    /// Reason for a transport error
    pub fn from_error(err: &ReqwestError) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect
        } else {
            Self::Network
        }
    }

    /// Whether the rate-limit retry budget applies
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// What to try when retries run out
    pub fn hint(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "lower --concurrency or raise --max-retries",
            Self::Server(_) => "Backlog may be degraded, run the backup again later",
            Self::Timeout | Self::Connect => "check the space domain and network access",
            Self::Network => "check network connectivity",
        }
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited {
                retry_after: Some(hint),
            } => write!(f, "rate limited (Retry-After {}s)", hint.as_secs()),
            Self::RateLimited { retry_after: None } => f.write_str("rate limited"),
            Self::Server(503) => f.write_str("service unavailable (503)"),
            Self::Server(code) => write!(f, "server error ({code})"),
            Self::Timeout => f.write_str("timeout"),
            Self::Connect => f.write_str("connection failed"),
            Self::Network => f.write_str("network error"),
        }
    }
}

/// One retry decision, rendered for the logs
#[derive(Debug, Clone)]
pub struct RetryNotice<'a> {
    /// Endpoint without query string
    pub endpoint: &'a str,
    /// Cause
    pub reason: RetryReason,
    /// Retry number, 1-based
    pub retry: u32,
    /// Retries allowed for this cause
    pub limit: u32,
    /// Delay before the next attempt
    pub delay: Duration,
}

impl RetryNotice<'_> {
    /// `Retrying /issues (2/5) after rate limited - waiting 2.0s`
    pub fn message(&self) -> String {
        format!(
            "Retrying {} ({}/{}) after {} - waiting {:.1}s",
            self.endpoint,
            self.retry,
            self.limit,
            self.reason,
            self.delay.as_secs_f64()
        )
    }

    /// Summary for the attempt that used up the budget
    pub fn exhausted(endpoint: &str, reason: RetryReason, attempts: u32) -> String {
        format!(
            "Giving up on {endpoint} after {attempts} attempts ({reason}); {}",
            reason.hint()
        )
    }
}
