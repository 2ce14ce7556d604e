//! Postgres-backed task store.
//!
//! All mutations are single statements (or rely on statement-level
//! atomicity), so `attempts` and `status` can never diverge. Leasing uses
//! `FOR UPDATE SKIP LOCKED` so concurrent workers neither block each other
//! nor observe the same row.
//!
//! Timestamps written here use the database clock (`NOW()`); retry times
//! computed by the worker use its own clock. The two are assumed to be
//! within a few seconds of each other, which is harmless against delays
//! measured in minutes.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};

use pushrelay_core::{NewTask, Priority, Task, TaskId, TaskStatus};

use super::{HistoryFilter, HistoryPage, QueueStats, StoreError, TaskStore};

/// Task store over a shared sqlx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TASK_COLUMNS: &str = "id, token, title, body, data, priority, client_id, \
     status, attempts, max_attempts, error_message, provider_message_id, \
     scheduled_at, created_at, updated_at";

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn create(&self, spec: NewTask) -> Result<Task, StoreError> {
        let id = TaskId::new();
        let data = spec
            .data
            .as_ref()
            .map(|d| serde_json::to_value(d).map_err(|e| StoreError::Backend(e.to_string())))
            .transpose()?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO push_queue (
                id, token, title, body, data, priority, client_id,
                status, attempts, max_attempts, scheduled_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', 0, $8, NOW(), NOW(), NOW())
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(&spec.token)
        .bind(&spec.title)
        .bind(&spec.body)
        .bind(data)
        .bind(spec.priority.as_str())
        .bind(&spec.client_id)
        .bind(spec.max_attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        task_from_row(&row)
    }

    async fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM push_queue WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get", e))?;

        match row {
            Some(row) => task_from_row(&row),
            None => Err(StoreError::NotFound),
        }
    }

    async fn lease_batch(&self, limit: i64) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE push_queue
            SET status = 'processing', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM push_queue
                WHERE status = 'pending'
                  AND scheduled_at <= NOW()
                  AND attempts < max_attempts
                ORDER BY scheduled_at ASC, id ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("lease_batch", e))?;

        let mut tasks = rows
            .iter()
            .map(task_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        // RETURNING order is unspecified; restore the selection order.
        tasks.sort_by(|a, b| (a.scheduled_at, a.id).cmp(&(b.scheduled_at, b.id)));
        Ok(tasks)
    }

    async fn complete_success(
        &self,
        id: TaskId,
        provider_message_id: &str,
    ) -> Result<(), StoreError> {
        // Guarded to non-terminal rows: terminal states are absorbing, so a
        // late or repeated completion is a no-op. The successful delivery
        // counts as a completed attempt.
        sqlx::query(
            r#"
            UPDATE push_queue
            SET status = 'success',
                provider_message_id = $2,
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id.as_uuid())
        .bind(provider_message_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete_success", e))?;

        Ok(())
    }

    async fn complete_failure(
        &self,
        id: TaskId,
        error_message: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let result = match retry_at {
            Some(retry_at) => {
                sqlx::query(
                    r#"
                    UPDATE push_queue
                    SET attempts = attempts + 1,
                        error_message = $2,
                        scheduled_at = $3,
                        status = 'pending',
                        updated_at = NOW()
                    WHERE id = $1 AND status IN ('pending', 'processing')
                    "#,
                )
                .bind(id.as_uuid())
                .bind(error_message)
                .bind(retry_at)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE push_queue
                    SET attempts = attempts + 1,
                        error_message = $2,
                        status = 'failed',
                        updated_at = NOW()
                    WHERE id = $1 AND status IN ('pending', 'processing')
                    "#,
                )
                .bind(id.as_uuid())
                .bind(error_message)
                .execute(&self.pool)
                .await
            }
        };

        result.map_err(|e| map_sqlx_error("complete_failure", e))?;
        Ok(())
    }

    async fn history(&self, filter: &HistoryFilter) -> Result<HistoryPage, StoreError> {
        let limit = filter.effective_limit();
        let offset = filter.effective_offset();
        let status = filter.status.map(|s| s.as_str());

        let count_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM push_queue
            WHERE ($1::text IS NULL OR client_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
            "#,
        )
        .bind(&filter.client_id)
        .bind(status)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("history_count", e))?;

        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| map_sqlx_error("history_count", e))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM push_queue
            WHERE ($1::text IS NULL OR client_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
            ORDER BY created_at DESC, id DESC
            LIMIT $5 OFFSET $6
            "#
        ))
        .bind(&filter.client_id)
        .bind(status)
        .bind(filter.start_date)
        .bind(filter.end_date)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("history", e))?;

        let tasks = rows
            .iter()
            .map(task_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(HistoryPage {
            tasks,
            total,
            limit,
            offset,
        })
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending')    AS pending_count,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing_count,
                COUNT(*) FILTER (WHERE status = 'success')    AS success_count,
                COUNT(*) FILTER (WHERE status = 'failed')     AS failed_count,
                COUNT(*)                                      AS total_count
            FROM push_queue
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("stats", e))?;

        let get = |name: &str| -> Result<i64, StoreError> {
            row.try_get(name).map_err(|e| map_sqlx_error("stats", e))
        };

        Ok(QueueStats {
            pending_count: get("pending_count")?,
            processing_count: get("processing_count")?,
            success_count: get("success_count")?,
            failed_count: get("failed_count")?,
            total_count: get("total_count")?,
        })
    }

    async fn delete_terminal_older_than(&self, older_than: Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or(chrono::Duration::zero());

        let result = sqlx::query(
            r#"
            DELETE FROM push_queue
            WHERE created_at < $1
              AND status IN ('success', 'failed')
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_terminal_older_than", e))?;

        Ok(result.rows_affected())
    }

    async fn release_stuck(&self, lease_ttl: Duration) -> Result<u64, StoreError> {
        let cutoff =
            Utc::now() - chrono::Duration::from_std(lease_ttl).unwrap_or(chrono::Duration::zero());

        let result = sqlx::query(
            r#"
            UPDATE push_queue
            SET status = 'pending', updated_at = NOW()
            WHERE status = 'processing'
              AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("release_stuck", e))?;

        Ok(result.rows_affected())
    }
}

/// Map sqlx failures into store errors, tagging the failing operation.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db_err) => {
            StoreError::Backend(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        other => StoreError::Backend(format!("sqlx error in {}: {}", operation, other)),
    }
}

// Row mapping.

#[derive(Debug)]
struct TaskRow {
    id: uuid::Uuid,
    token: String,
    title: String,
    body: String,
    data: Option<serde_json::Value>,
    priority: String,
    client_id: Option<String>,
    status: String,
    attempts: i32,
    max_attempts: i32,
    error_message: Option<String>,
    provider_message_id: Option<String>,
    scheduled_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for TaskRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(TaskRow {
            id: row.try_get("id")?,
            token: row.try_get("token")?,
            title: row.try_get("title")?,
            body: row.try_get("body")?,
            data: row.try_get("data")?,
            priority: row.try_get("priority")?,
            client_id: row.try_get("client_id")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            error_message: row.try_get("error_message")?,
            provider_message_id: row.try_get("provider_message_id")?,
            scheduled_at: row.try_get("scheduled_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn task_from_row(row: &sqlx::postgres::PgRow) -> Result<Task, StoreError> {
    let row = TaskRow::from_row(row)
        .map_err(|e| StoreError::Backend(format!("failed to deserialize task row: {}", e)))?;

    // A NULL data column maps to None; an empty map is stored as {}.
    let data: Option<HashMap<String, String>> = row
        .data
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StoreError::Backend(format!("invalid data payload: {}", e)))?;

    Ok(Task {
        id: TaskId::from_uuid(row.id),
        token: row.token,
        title: row.title,
        body: row.body,
        data,
        priority: Priority::from_str(&row.priority)
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        client_id: row.client_id,
        status: TaskStatus::from_str(&row.status)
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        attempts: row.attempts,
        max_attempts: row.max_attempts,
        error_message: row.error_message,
        provider_message_id: row.provider_message_id,
        scheduled_at: row.scheduled_at,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
