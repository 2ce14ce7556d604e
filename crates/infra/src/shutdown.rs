//! Graceful shutdown coordination.
//!
//! One process-wide signal, triggered once and observed by every long-lived
//! task (HTTP server, worker pool, retention sweeper). Passed explicitly into
//! constructors; there is no module-level state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

/// Cancellation signal shared between the server and background tasks.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.triggered.load(Ordering::SeqCst))
            .finish()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent; wakes every waiter once.
    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            info!("shutdown requested");
            self.notify.notify_waiters();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if it already
    /// was.
    pub async fn cancelled(&self) {
        if self.is_triggered() {
            return;
        }
        let notified = self.notify.notified();
        // Re-check after registering so a trigger between the check and the
        // await cannot be missed.
        if self.is_triggered() {
            return;
        }
        notified.await;
    }

    /// Install SIGINT/SIGTERM handlers that trigger this signal.
    pub fn install_signal_handlers(&self) -> tokio::task::JoinHandle<()> {
        let signal = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal as unix_signal, SignalKind};

                let mut sigint =
                    unix_signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
                let mut sigterm =
                    unix_signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

                tokio::select! {
                    _ = sigint.recv() => warn!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => warn!("received SIGTERM, shutting down"),
                }
                signal.trigger();
            }

            #[cfg(not(unix))]
            {
                tokio::signal::ctrl_c()
                    .await
                    .expect("failed to install Ctrl+C handler");
                warn!("received Ctrl+C, shutting down");
                signal.trigger();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn starts_untriggered() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_triggered());
    }

    #[tokio::test]
    async fn trigger_is_idempotent_and_observable() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger();
        assert!(signal.is_triggered());
        // Must not hang after the fact.
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wakes_waiters_registered_before_trigger() {
        let signal = ShutdownSignal::new();
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
