//! Unit tests for the shared request limiter

use async_trait::async_trait;
use backlog_backup::backup::rate_limit::{Clock, RateLimiter};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_are_spaced() {
    let limiter = Arc::new(RateLimiter::with_interval(Duration::from_secs(1)));
    let start = Instant::now();

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire().await })
        })
        .collect();

    let mut grants = Vec::new();
    for handle in handles {
        grants.push(handle.await.unwrap());
    }
    grants.sort();

    assert_eq!(grants[0], start);
    for pair in grants.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(1));
    }
    assert!(grants[4] - start >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_shared_limiter_spans_clients() {
    let limiter = Arc::new(RateLimiter::with_interval(Duration::from_millis(500)));
    let api_side = limiter.clone();
    let browser_side = limiter.clone();

    let (a, b) = tokio::join!(api_side.acquire(), browser_side.acquire());
    let gap = if a > b { a - b } else { b - a };
    assert!(gap >= Duration::from_millis(500));
}

/// Clock that jumps forward instead of sleeping
struct SteppingClock {
    now: Mutex<Instant>,
    sleeps: Mutex<Vec<Instant>>,
}

#[async_trait]
impl Clock for SteppingClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    async fn sleep_until(&self, deadline: Instant) {
        self.sleeps.lock().unwrap().push(deadline);
        *self.now.lock().unwrap() = deadline;
    }
}

#[tokio::test]
async fn test_custom_clock_drives_waits() {
    let origin = Instant::now();
    let clock = Arc::new(SteppingClock {
        now: Mutex::new(origin),
        sleeps: Mutex::new(Vec::new()),
    });
    let limiter = RateLimiter::with_clock(Duration::from_secs(2), clock.clone());

    let first = limiter.acquire().await;
    let second = limiter.acquire().await;
    let third = limiter.acquire().await;

    assert_eq!(first, origin);
    assert_eq!(second, origin + Duration::from_secs(2));
    assert_eq!(third, origin + Duration::from_secs(4));
    assert_eq!(clock.sleeps.lock().unwrap().len(), 2);
    assert_eq!(limiter.interval(), Duration::from_secs(2));
}
