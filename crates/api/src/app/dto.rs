//! Request/response DTOs, validation, and JSON mapping.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pushrelay_core::{DomainError, NewTask, Priority, Task, TaskId, TaskStatus};
use pushrelay_infra::store::HistoryFilter;

/// Upper bound on entries in the `data` map.
pub const DATA_MAX_ENTRIES: usize = 64;
/// Upper bound on the serialized size of the `data` map.
pub const DATA_MAX_BYTES: usize = 4096;
/// Upper bound on a caller-supplied attempt cap.
pub const MAX_ATTEMPTS_CAP: i32 = 10;
/// Batch size bounds.
pub const BATCH_MIN: usize = 1;
pub const BATCH_MAX: usize = 500;

/// Body of `POST /api/v1/push/send` (and each batch element).
///
/// Every field is a raw JSON value at the serde level so that missing
/// required fields *and* type mismatches surface as the documented
/// validation error shape instead of a deserialization rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushRequest {
    #[serde(default)]
    pub token: Option<serde_json::Value>,
    #[serde(default)]
    pub title: Option<serde_json::Value>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub priority: Option<serde_json::Value>,
    #[serde(default)]
    pub client_id: Option<serde_json::Value>,
    #[serde(default)]
    pub max_attempts: Option<serde_json::Value>,
}

impl PushRequest {
    /// Validate the request and turn it into a creation spec.
    pub fn into_new_task(self, default_max_attempts: i32) -> Result<NewTask, DomainError> {
        let token = string_field("token", self.token)?.unwrap_or_default();
        let title = string_field("title", self.title)?.unwrap_or_default();
        let body = string_field("body", self.body)?.unwrap_or_default();

        let priority: Priority = string_field("priority", self.priority)?
            .unwrap_or_default()
            .parse()?;

        let data = data_field("data", self.data)?;
        if let Some(data) = &data {
            if data.len() > DATA_MAX_ENTRIES {
                return Err(DomainError::validation(format!(
                    "data must have at most {} entries",
                    DATA_MAX_ENTRIES
                )));
            }
            let serialized = serde_json::to_string(data)
                .map_err(|e| DomainError::validation(format!("data is not serializable: {}", e)))?;
            if serialized.len() > DATA_MAX_BYTES {
                return Err(DomainError::validation(format!(
                    "data must serialize to at most {} bytes",
                    DATA_MAX_BYTES
                )));
            }
        }

        let max_attempts = match int_field("max_attempts", self.max_attempts)? {
            None => default_max_attempts,
            Some(n) if (1..=i64::from(MAX_ATTEMPTS_CAP)).contains(&n) => n as i32,
            Some(_) => {
                return Err(DomainError::validation(format!(
                    "max_attempts must be between 1 and {}",
                    MAX_ATTEMPTS_CAP
                )))
            }
        };

        let mut spec = NewTask::new(token, title, body)
            .with_priority(priority)
            .with_max_attempts(max_attempts);
        if let Some(data) = data {
            spec = spec.with_data(data);
        }
        if let Some(client_id) =
            string_field("client_id", self.client_id)?.filter(|c| !c.is_empty())
        {
            spec = spec.with_client_id(client_id);
        }

        spec.validate()?;
        Ok(spec)
    }
}

/// Extract an optional string field; JSON `null` counts as absent.
fn string_field(
    field: &'static str,
    value: Option<serde_json::Value>,
) -> Result<Option<String>, DomainError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(DomainError::validation(format!("{} must be a string", field))),
    }
}

/// Extract an optional integer field; JSON `null` counts as absent.
fn int_field(
    field: &'static str,
    value: Option<serde_json::Value>,
) -> Result<Option<i64>, DomainError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| DomainError::validation(format!("{} must be an integer", field))),
        Some(_) => Err(DomainError::validation(format!(
            "{} must be an integer",
            field
        ))),
    }
}

/// Extract the optional `data` map: an object whose values are all strings.
fn data_field(
    field: &'static str,
    value: Option<serde_json::Value>,
) -> Result<Option<HashMap<String, String>>, DomainError> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Object(map)) => {
            let mut data = HashMap::with_capacity(map.len());
            for (key, value) in map {
                match value {
                    serde_json::Value::String(s) => {
                        data.insert(key, s);
                    }
                    _ => {
                        return Err(DomainError::validation(format!(
                            "{} values must be strings",
                            field
                        )))
                    }
                }
            }
            Ok(Some(data))
        }
        Some(_) => Err(DomainError::validation(format!(
            "{} must be an object of string values",
            field
        ))),
    }
}

/// Body of `POST /api/v1/push/send-batch`.
#[derive(Debug, Default, Deserialize)]
pub struct BatchPushRequest {
    #[serde(default)]
    pub notifications: Vec<PushRequest>,
}

/// Task as returned by the status, history and enqueue endpoints. Batch
/// elements that failed to enqueue reuse this shape with only `status` and
/// `error_message` populated.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            id: Some(task.id),
            status: task.status,
            token: Some(task.token.clone()),
            title: Some(task.title.clone()),
            body: Some(task.body.clone()),
            client_id: task.client_id.clone(),
            attempts: task.attempts,
            max_attempts: task.max_attempts,
            error_message: task.error_message.clone(),
            provider_message_id: task.provider_message_id.clone(),
            created_at: Some(task.created_at),
            updated_at: Some(task.updated_at),
        }
    }
}

impl TaskResponse {
    /// Batch element for a notification that could not be enqueued.
    pub fn enqueue_error(message: impl Into<String>) -> Self {
        Self {
            id: None,
            status: TaskStatus::Failed,
            token: None,
            title: None,
            body: None,
            client_id: None,
            attempts: 0,
            max_attempts: 0,
            error_message: Some(message.into()),
            provider_message_id: None,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Query string of `GET /api/v1/queue/history`.
///
/// Raw strings; parsing happens in [`HistoryQuery::into_filter`] so malformed
/// values produce the documented 400 shape rather than an extractor
/// rejection.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub offset: Option<String>,
}

impl HistoryQuery {
    pub fn into_filter(self) -> Result<HistoryFilter, DomainError> {
        let status: Option<TaskStatus> = match self.status.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(raw.parse()?),
        };

        let start_date = parse_date("start_date", self.start_date.as_deref())?;
        let end_date = parse_date("end_date", self.end_date.as_deref())?;
        let limit = parse_int("limit", self.limit.as_deref())?.unwrap_or(0);
        let offset = parse_int("offset", self.offset.as_deref())?.unwrap_or(0);

        Ok(HistoryFilter {
            client_id: self.client_id.filter(|c| !c.is_empty()),
            status,
            start_date,
            end_date,
            limit,
            offset,
        })
    }
}

fn parse_date(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, DomainError> {
    match raw {
        None | Some("") => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| DomainError::validation(format!("{} must be RFC 3339: {}", field, e))),
    }
}

fn parse_int(field: &str, raw: Option<&str>) -> Result<Option<i64>, DomainError> {
    match raw {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<i64>()
            .map(Some)
            .map_err(|_| DomainError::validation(format!("{} must be an integer", field))),
    }
}
