//! Retention sweeper: periodically deletes old terminal tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::shutdown::ShutdownSignal;
use crate::store::TaskStore;

/// Sweeper tuning.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Pause between sweeps; the first sweep runs immediately at startup.
    pub interval: Duration,
    /// Age beyond which terminal tasks are deleted.
    pub retention: Duration,
    /// Deadline for one sweep.
    pub run_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            retention: Duration::from_secs(30 * 24 * 60 * 60),
            run_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Periodic deleter of `success`/`failed` rows past the retention horizon.
/// Never touches live (`pending`/`processing`) rows, regardless of age.
pub struct RetentionSweeper {
    store: Arc<dyn TaskStore>,
    config: SweeperConfig,
    shutdown: ShutdownSignal,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn TaskStore>, config: SweeperConfig, shutdown: ShutdownSignal) -> Self {
        Self {
            store,
            config,
            shutdown,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(
            retention_secs = self.config.retention.as_secs(),
            interval_secs = self.config.interval.as_secs(),
            "retention sweeper started"
        );

        // The first tick fires immediately, giving the startup sweep.
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("retention sweeper stopping");
                    break;
                }
                _ = ticker.tick() => self.sweep().await,
            }
        }
    }

    async fn sweep(&self) {
        let result = tokio::time::timeout(
            self.config.run_timeout,
            self.store.delete_terminal_older_than(self.config.retention),
        )
        .await;

        match result {
            Ok(Ok(0)) => {}
            Ok(Ok(deleted)) => info!(deleted, "retention sweep deleted old tasks"),
            Ok(Err(e)) => error!(error = %e, "retention sweep failed"),
            Err(_) => warn!("retention sweep deadline exceeded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use pushrelay_core::{NewTask, TaskStatus};

    use super::*;
    use crate::store::InMemoryTaskStore;

    #[tokio::test]
    async fn startup_sweep_removes_only_old_terminal_rows() {
        let store = Arc::new(InMemoryTaskStore::new());
        let old = Utc::now() - chrono::Duration::days(40);

        let mut old_success = store
            .create(NewTask::new("t1", "a", "b"))
            .await
            .unwrap();
        old_success.status = TaskStatus::Success;
        old_success.created_at = old;
        store.insert_raw(old_success);

        let mut old_pending = store
            .create(NewTask::new("t2", "a", "b"))
            .await
            .unwrap();
        old_pending.created_at = old;
        store.insert_raw(old_pending);

        let fresh = store.create(NewTask::new("t3", "a", "b")).await.unwrap();

        let shutdown = ShutdownSignal::new();
        let sweeper = RetentionSweeper::new(
            store.clone(),
            SweeperConfig {
                retention: Duration::from_secs(30 * 24 * 60 * 60),
                ..Default::default()
            },
            shutdown.clone(),
        );

        let handle = sweeper.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        handle.await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.pending_count, 2);
        assert!(store.get(fresh.id).await.is_ok());
    }
}
