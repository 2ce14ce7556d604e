//! In-memory task store for tests and local development.
//!
//! Mirrors the Postgres implementation's transition semantics exactly
//! (selection order, terminal guards, attempt arithmetic) so the worker pool
//! and the HTTP surface can be exercised without a database.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pushrelay_core::{NewTask, Task, TaskId, TaskStatus};

use super::{HistoryFilter, HistoryPage, QueueStats, StoreError, TaskStore};

/// Mutex-guarded map of tasks; the single lock is what makes leasing atomic.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: overwrite a task wholesale (e.g. to age `created_at`).
    pub fn insert_raw(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, spec: NewTask) -> Result<Task, StoreError> {
        let now = Utc::now();
        let task = Task {
            id: TaskId::new(),
            token: spec.token,
            title: spec.title,
            body: spec.body,
            data: spec.data,
            priority: spec.priority,
            client_id: spec.client_id,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts: spec.max_attempts,
            error_message: None,
            provider_message_id: None,
            scheduled_at: now,
            created_at: now,
            updated_at: now,
        };

        self.tasks.lock().unwrap().insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        self.tasks
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn lease_batch(&self, limit: i64) -> Result<Vec<Task>, StoreError> {
        let mut tasks = self.tasks.lock().unwrap();
        let now = Utc::now();

        let mut ready: Vec<(DateTime<Utc>, TaskId)> = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending
                    && t.scheduled_at <= now
                    && t.attempts < t.max_attempts
            })
            .map(|t| (t.scheduled_at, t.id))
            .collect();
        ready.sort();
        ready.truncate(usize::try_from(limit.max(0)).unwrap_or(0));

        let mut leased = Vec::with_capacity(ready.len());
        for (_, id) in ready {
            if let Some(task) = tasks.get_mut(&id) {
                task.status = TaskStatus::Processing;
                task.updated_at = now;
                leased.push(task.clone());
            }
        }
        Ok(leased)
    }

    async fn complete_success(
        &self,
        id: TaskId,
        provider_message_id: &str,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(&id) {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Success;
                task.provider_message_id = Some(provider_message_id.to_string());
                task.attempts += 1;
                task.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn complete_failure(
        &self,
        id: TaskId,
        error_message: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(&id) {
            if !task.status.is_terminal() {
                task.attempts += 1;
                task.error_message = Some(error_message.to_string());
                task.updated_at = Utc::now();
                match retry_at {
                    Some(retry_at) => {
                        task.status = TaskStatus::Pending;
                        task.scheduled_at = retry_at;
                    }
                    None => task.status = TaskStatus::Failed,
                }
            }
        }
        Ok(())
    }

    async fn history(&self, filter: &HistoryFilter) -> Result<HistoryPage, StoreError> {
        let tasks = self.tasks.lock().unwrap();

        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|t| {
                filter
                    .client_id
                    .as_ref()
                    .map_or(true, |c| t.client_id.as_deref() == Some(c.as_str()))
                    && filter.status.map_or(true, |s| t.status == s)
                    && filter.start_date.map_or(true, |d| t.created_at >= d)
                    && filter.end_date.map_or(true, |d| t.created_at <= d)
            })
            .cloned()
            .collect();

        // Newest first; id as tie-break to keep pagination deterministic.
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let total = matching.len() as i64;
        let limit = filter.effective_limit();
        let offset = filter.effective_offset();

        let page: Vec<Task> = matching
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();

        Ok(HistoryPage {
            tasks: page,
            total,
            limit,
            offset,
        })
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let tasks = self.tasks.lock().unwrap();
        let mut stats = QueueStats::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending_count += 1,
                TaskStatus::Processing => stats.processing_count += 1,
                TaskStatus::Success => stats.success_count += 1,
                TaskStatus::Failed => stats.failed_count += 1,
            }
            stats.total_count += 1;
        }
        Ok(stats)
    }

    async fn delete_terminal_older_than(&self, older_than: Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());

        let mut tasks = self.tasks.lock().unwrap();
        let before = tasks.len();
        tasks.retain(|_, t| !(t.status.is_terminal() && t.created_at < cutoff));
        Ok((before - tasks.len()) as u64)
    }

    async fn release_stuck(&self, lease_ttl: Duration) -> Result<u64, StoreError> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(lease_ttl).unwrap_or(chrono::Duration::zero());

        let mut tasks = self.tasks.lock().unwrap();
        let mut released = 0;
        for task in tasks.values_mut() {
            if task.status == TaskStatus::Processing && task.updated_at < cutoff {
                task.status = TaskStatus::Pending;
                task.updated_at = now;
                released += 1;
            }
        }
        Ok(released)
    }
}
