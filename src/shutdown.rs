//! Operator interrupt handling.
//!
//! A [`ShutdownCoordinator`] is shared between the Ctrl+C listener and the
//! export driver. The driver checks it between suspensions and races its
//! pacing and backoff sleeps against it, so an interrupt never lands in the
//! middle of a store write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::warn;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Notifies all registered waiters exactly once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before re-checking the flag so a concurrent request is not lost
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

/// Spawn a task that requests shutdown on Ctrl+C.
pub fn listen_for_ctrl_c(shutdown: SharedShutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received - finishing the current write, then stopping");
            shutdown.request_shutdown();
        }
    })
}

/// Sleep for `duration` unless shutdown is requested first.
///
/// Returns `true` if the full duration elapsed, `false` if interrupted.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: Option<&ShutdownCoordinator>) -> bool {
    let Some(shutdown) = shutdown else {
        tokio::time::sleep(duration).await;
        return true;
    };
    if shutdown.is_shutdown_requested() {
        return false;
    }
    if duration.is_zero() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.wait_for_shutdown() => false,
    }
}
