//! Graceful shutdown handling.
//!
//! The coordinator listens for SIGTERM/SIGINT and exposes a flag the
//! orchestrator checks between nodes: in-flight runs park WAITING so a
//! restarted process resumes them instead of losing progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tracing::info;

/// Coordinates graceful shutdown across the application.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    shutdown_requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Safe to call multiple times.
    pub fn request_shutdown(&self) {
        let was_requested = self.shutdown_requested.swap(true, Ordering::SeqCst);
        if !was_requested {
            info!("Shutdown requested");
            self.notify.notify_waiters();
        }
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Resolves immediately if it
    /// already was.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutdown_requested() {
            return;
        }
        self.notify.notified().await;
    }

    /// Spawn a task that requests shutdown on SIGTERM or SIGINT.
    pub fn start_signal_listener(&self) {
        let coordinator = self.clone();

        tokio::spawn(async move {
            let ctrl_c = signal::ctrl_c();

            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to create SIGTERM handler");

                tokio::select! {
                    _ = ctrl_c => {
                        info!("Received SIGINT, initiating graceful shutdown");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                }
            }

            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
                info!("Received Ctrl-C, initiating graceful shutdown");
            }

            coordinator.request_shutdown();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_sets_flag_and_wakes_waiters() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutdown_requested());

        let waiter = coordinator.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_shutdown().await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        coordinator.request_shutdown();

        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(coordinator.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_requested() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request_shutdown();
        coordinator.request_shutdown(); // idempotent
        coordinator.wait_for_shutdown().await;
    }
}
