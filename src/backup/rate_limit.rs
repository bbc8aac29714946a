//! Global request cadence
//!
//! One [`RateLimiter`] is created per run and handed to every client at
//! construction. `acquire()` grants at most one call per interval across all
//! holders, in request order.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::config::REQUEST_INTERVAL;
use crate::metrics::RateLimiterMetrics;

/// Time source for the limiter
///
/// Production uses tokio's clock, which tests can pause and advance.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Sleep until `deadline`
    async fn sleep_until(&self, deadline: Instant);
}

/// [`Clock`] backed by `tokio::time`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Minimum-spacing limiter shared by the API and browser paths
///
/// Waiters queue on a fair mutex, so grants follow arrival order. The holder
/// sleeps until its slot opens, records the grant and releases the lock.
pub struct RateLimiter {
    interval: Duration,
    last_grant: Mutex<Option<Instant>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Limiter with the default one-second interval
    pub fn new() -> Self {
        Self::with_interval(REQUEST_INTERVAL)
    }

    /// Limiter with a custom interval
    pub fn with_interval(interval: Duration) -> Self {
        Self::with_clock(interval, Arc::new(TokioClock))
    }

    /// Limiter driven by a substitutable clock
    pub fn with_clock(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            last_grant: Mutex::new(None),
            clock,
        }
    }

    /// Configured spacing between grants
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next slot
    ///
    /// Returns the instant the slot was granted.
    pub async fn acquire(&self) -> Instant {
        let requested = self.clock.now();
        let mut last_grant = self.last_grant.lock().await;

        if let Some(previous) = *last_grant {
            let next_slot = previous + self.interval;
            if self.clock.now() < next_slot {
                self.clock.sleep_until(next_slot).await;
            }
        }

        let granted = self.clock.now();
        *last_grant = Some(granted);
        drop(last_grant);

        let waited = granted.saturating_duration_since(requested);
        trace!(waited_ms = waited.as_millis() as u64, "Rate limiter slot granted");
        RateLimiterMetrics::record_wait(waited);
        granted
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("interval", &self.interval)
            .finish()
    }
}
