use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use tracing::{info, warn};

use crate::app::{dto, errors, AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/send", post(send_push))
        .route("/send-batch", post(send_batch_push))
}

/// Enqueue one notification. 202: the task is persisted, delivery happens
/// asynchronously.
pub async fn send_push(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::PushRequest>,
) -> axum::response::Response {
    let spec = match body.into_new_task(services.default_max_attempts) {
        Ok(spec) => spec,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
    };

    match services.store.create(spec).await {
        Ok(task) => {
            info!(task_id = %task.id, client_id = ?task.client_id, "push notification enqueued");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "queue_task_id": task.id,
                    "status": task.status,
                    "message": "push notification queued",
                })),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "failed to enqueue push");
            errors::json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "enqueue_failed",
                e.to_string(),
            )
        }
    }
}

/// Enqueue up to [`dto::BATCH_MAX`] notifications. Failures in one element
/// do not abort the others; every element gets its own response entry.
pub async fn send_batch_push(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::BatchPushRequest>,
) -> axum::response::Response {
    let count = body.notifications.len();
    if !(dto::BATCH_MIN..=dto::BATCH_MAX).contains(&count) {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!(
                "notifications must contain between {} and {} entries",
                dto::BATCH_MIN,
                dto::BATCH_MAX
            ),
        );
    }

    let mut tasks = Vec::with_capacity(count);
    let mut queued = 0usize;

    for (index, request) in body.notifications.into_iter().enumerate() {
        let spec = match request.into_new_task(services.default_max_attempts) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(index, error = %e, "skipping invalid batch element");
                tasks.push(dto::TaskResponse::enqueue_error(e.to_string()));
                continue;
            }
        };

        match services.store.create(spec).await {
            Ok(task) => {
                queued += 1;
                tasks.push(dto::TaskResponse::from(&task));
            }
            Err(e) => {
                warn!(index, error = %e, "failed to enqueue batch element");
                tasks.push(dto::TaskResponse::enqueue_error(e.to_string()));
            }
        }
    }

    info!(queued, total = count, "batch push notifications enqueued");

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "queued_count": queued,
            "tasks": tasks,
            "message": "batch push notifications queued",
        })),
    )
        .into_response()
}
