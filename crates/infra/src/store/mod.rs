//! Durable task store.
//!
//! The queue has no in-process representation: it is the set of `pending`
//! rows whose `scheduled_at` has passed, ordered by `(scheduled_at, id)`.
//! Workers claim rows through [`TaskStore::lease_batch`], which guarantees
//! each row is leased by at most one caller at any instant.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use pushrelay_core::{NewTask, Task, TaskId, TaskStatus};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryTaskStore;
pub use postgres::PostgresTaskStore;

/// Task store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found")]
    NotFound,

    /// Transient or unexpected backend failure. Worker and sweeper callers
    /// log these and continue on the next tick.
    #[error("storage error: {0}")]
    Backend(String),
}

/// History listing filter; all criteria optional and combined with AND.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub client_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// Page size cap for history listings.
pub const HISTORY_LIMIT_MAX: i64 = 500;
/// Page size used when the caller does not specify one.
pub const HISTORY_LIMIT_DEFAULT: i64 = 50;

impl HistoryFilter {
    /// Effective limit: default when unset or non-positive, capped at
    /// [`HISTORY_LIMIT_MAX`].
    pub fn effective_limit(&self) -> i64 {
        if self.limit <= 0 {
            HISTORY_LIMIT_DEFAULT
        } else {
            self.limit.min(HISTORY_LIMIT_MAX)
        }
    }

    /// Effective offset: clamped to non-negative.
    pub fn effective_offset(&self) -> i64 {
        self.offset.max(0)
    }
}

/// One page of task history plus the total count matching the filter.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub tasks: Vec<Task>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Queue-wide counters, computed in one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending_count: i64,
    pub processing_count: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub total_count: i64,
}

/// Persistence seam for the push queue.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task in `pending` with zero attempts, scheduled now.
    /// Atomic: a partially-populated row is never visible.
    async fn create(&self, spec: NewTask) -> Result<Task, StoreError>;

    /// Fetch a task by id.
    async fn get(&self, id: TaskId) -> Result<Task, StoreError>;

    /// Atomically claim up to `limit` ready `pending` rows, moving them to
    /// `processing`. Concurrent callers never block each other and never
    /// observe the same row (skip-locked semantics). Returns the claimed
    /// rows in `(scheduled_at, id)` order; empty when nothing is ready.
    async fn lease_batch(&self, limit: i64) -> Result<Vec<Task>, StoreError>;

    /// Record a delivered task. The successful delivery counts as a
    /// completed attempt. Idempotent; never rewrites a terminal row.
    async fn complete_success(
        &self,
        id: TaskId,
        provider_message_id: &str,
    ) -> Result<(), StoreError>;

    /// Record a failed attempt in one transition: increments `attempts` and
    /// stores the error. With `retry_at` the row returns to `pending` at
    /// that time; without it the row is terminally `failed`. Never rewrites
    /// a terminal row.
    async fn complete_failure(
        &self,
        id: TaskId,
        error_message: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Filtered, paginated listing ordered by `created_at DESC`.
    async fn history(&self, filter: &HistoryFilter) -> Result<HistoryPage, StoreError>;

    /// Per-status counts plus grand total.
    async fn stats(&self) -> Result<QueueStats, StoreError>;

    /// Delete terminal rows created before `now - older_than`. Returns the
    /// number of rows removed. Never touches `pending`/`processing` rows.
    async fn delete_terminal_older_than(&self, older_than: Duration) -> Result<u64, StoreError>;

    /// Stuck-lease recovery: return `processing` rows whose lease went stale
    /// (`updated_at < now - lease_ttl`) to `pending`. Returns the number of
    /// rows released.
    async fn release_stuck(&self, lease_ttl: Duration) -> Result<u64, StoreError>;
}
