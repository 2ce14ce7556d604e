//! Worker pool: leases ready tasks and delivers them through the provider.
//!
//! N independent workers poll the store on a timer. Each tick runs under a
//! bounded deadline: lease a batch, process it sequentially, report every
//! outcome back to the store. Workers are stateless with respect to tasks;
//! the database is the only shared state. A separate reclaim loop returns
//! stale `processing` leases (crashed or deadline-expired workers) to
//! `pending`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use pushrelay_core::{BackoffPolicy, Task};

use crate::config::WorkerSettings;
use crate::provider::{ProviderError, PushMessage, PushProvider};
use crate::shutdown::ShutdownSignal;
use crate::store::TaskStore;

/// Worker pool tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops.
    pub worker_count: usize,
    /// Pause between lease polls.
    pub poll_interval: Duration,
    /// Rows leased per poll.
    pub batch_size: i64,
    /// Deadline for one lease-and-process cycle.
    pub batch_timeout: Duration,
    /// Age after which a `processing` lease is considered abandoned.
    pub lease_ttl: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 5,
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            batch_timeout: Duration::from_secs(30),
            lease_ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl From<&WorkerSettings> for WorkerConfig {
    fn from(settings: &WorkerSettings) -> Self {
        Self {
            worker_count: settings.worker_count,
            poll_interval: settings.poll_interval,
            lease_ttl: settings.lease_ttl,
            ..Default::default()
        }
    }
}

/// Handle over the pool's spawned tasks.
pub struct WorkerPoolHandle {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Wait for every worker and the reclaim loop to exit.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Pool of delivery workers plus the stuck-lease reclaimer.
pub struct WorkerPool {
    store: Arc<dyn TaskStore>,
    provider: Arc<dyn PushProvider>,
    backoff: BackoffPolicy,
    config: WorkerConfig,
    shutdown: ShutdownSignal,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn TaskStore>,
        provider: Arc<dyn PushProvider>,
        backoff: BackoffPolicy,
        config: WorkerConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            store,
            provider,
            backoff,
            config,
            shutdown,
        }
    }

    /// Spawn the worker loops and the reclaim loop.
    pub fn start(&self) -> WorkerPoolHandle {
        info!(
            worker_count = self.config.worker_count,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "starting worker pool"
        );

        let mut handles = Vec::with_capacity(self.config.worker_count + 1);
        for worker_id in 0..self.config.worker_count {
            let worker = Worker {
                id: worker_id,
                store: self.store.clone(),
                provider: self.provider.clone(),
                backoff: self.backoff.clone(),
                config: self.config.clone(),
                shutdown: self.shutdown.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        handles.push(tokio::spawn(reclaim_loop(
            self.store.clone(),
            self.config.lease_ttl,
            self.shutdown.clone(),
        )));

        WorkerPoolHandle { handles }
    }
}

struct Worker {
    id: usize,
    store: Arc<dyn TaskStore>,
    provider: Arc<dyn PushProvider>,
    backoff: BackoffPolicy,
    config: WorkerConfig,
    shutdown: ShutdownSignal,
}

impl Worker {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(worker_id = self.id, "worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(worker_id = self.id, "worker stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if tokio::time::timeout(self.config.batch_timeout, self.process_batch())
                        .await
                        .is_err()
                    {
                        // Leased rows left in `processing` are picked up by
                        // the reclaim loop once their lease goes stale.
                        warn!(worker_id = self.id, "batch deadline exceeded");
                    }
                }
            }
        }
    }

    async fn process_batch(&self) {
        let tasks = match self.store.lease_batch(self.config.batch_size).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(worker_id = self.id, error = %e, "failed to lease tasks");
                return;
            }
        };

        if tasks.is_empty() {
            return;
        }

        debug!(worker_id = self.id, count = tasks.len(), "processing leased batch");

        for task in tasks {
            if self.shutdown.is_triggered() {
                // Remaining leased rows stay `processing` on disk and are
                // reclaimed after the lease TTL.
                break;
            }
            self.process_task(&task).await;
        }
    }

    async fn process_task(&self, task: &Task) {
        info!(
            worker_id = self.id,
            task_id = %task.id,
            attempt = task.attempts + 1,
            max_attempts = task.max_attempts,
            "processing task"
        );

        match self.provider.send(&PushMessage::from(task)).await {
            Ok(message_id) => {
                if let Err(e) = self.store.complete_success(task.id, &message_id).await {
                    error!(worker_id = self.id, task_id = %task.id, error = %e, "failed to record success");
                    return;
                }
                info!(
                    worker_id = self.id,
                    task_id = %task.id,
                    provider_message_id = %message_id,
                    "task delivered"
                );
            }
            Err(err) => self.handle_failure(task, err).await,
        }
    }

    async fn handle_failure(&self, task: &Task, err: ProviderError) {
        let next_attempt = task.attempts + 1;

        if err.is_retryable() && next_attempt < task.max_attempts {
            let retry_at = self.backoff.next_retry_at(Utc::now(), task.attempts);
            info!(
                worker_id = self.id,
                task_id = %task.id,
                error = %err,
                retry_at = %retry_at,
                attempt = next_attempt,
                max_attempts = task.max_attempts,
                "scheduling retry"
            );
            if let Err(e) = self
                .store
                .complete_failure(task.id, &err.to_string(), Some(retry_at))
                .await
            {
                error!(worker_id = self.id, task_id = %task.id, error = %e, "failed to schedule retry");
            }
        } else {
            warn!(
                worker_id = self.id,
                task_id = %task.id,
                error = %err,
                attempts = next_attempt,
                "task permanently failed"
            );
            if let Err(e) = self
                .store
                .complete_failure(task.id, &err.to_string(), None)
                .await
            {
                error!(worker_id = self.id, task_id = %task.id, error = %e, "failed to record failure");
            }
        }
    }
}

/// Stuck-lease recovery: one immediate pass at startup, then one per TTL.
async fn reclaim_loop(store: Arc<dyn TaskStore>, lease_ttl: Duration, shutdown: ShutdownSignal) {
    let mut ticker = tokio::time::interval(lease_ttl);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match store.release_stuck(lease_ttl).await {
                    Ok(0) => {}
                    Ok(released) => info!(released, "released stuck leases"),
                    Err(e) => error!(error = %e, "stuck-lease reclaim failed"),
                }
            }
        }
    }
}
