//! Run cancellation.
//!
//! A [`ShutdownCoordinator`] is shared between the Ctrl+C listener, the
//! orchestrator and the HTTP client. Once requested, no new item fetch is
//! dispatched and backoff sleeps end early; writes already in flight finish
//! atomically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::warn;

/// Exit code used when a second Ctrl+C cuts the drain short
pub const EXIT_INTERRUPTED: i32 = 130;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Cancellation flag with async waiters.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    wake: Notify,
}

impl ShutdownCoordinator {
    /// Coordinator that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// New coordinator behind an [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown; waiters are woken on the first call only.
    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.wake.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown is requested.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.wake.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a request in between is not lost.
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

/// Route Ctrl+C to `shutdown`
///
/// The first signal lets in-flight items drain; a second one exits the process
/// with [`EXIT_INTERRUPTED`].
pub fn listen_for_ctrl_c(shutdown: SharedShutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Ctrl+C received, finishing in-flight items (press again to stop now)");
        shutdown.request_shutdown();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second Ctrl+C, exiting without waiting");
            std::process::exit(EXIT_INTERRUPTED);
        }
    })
}
