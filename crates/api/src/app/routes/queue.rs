use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use pushrelay_core::TaskId;

use crate::app::{dto, errors, AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/status/:id", get(task_status))
        .route("/history", get(history))
        .route("/stats", get(stats))
}

pub async fn task_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TaskId = match id.parse() {
        Ok(id) => id,
        Err(_) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_id",
                "invalid task id format",
            )
        }
    };

    match services.store.get(id).await {
        Ok(task) => (StatusCode::OK, Json(dto::TaskResponse::from(&task))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::HistoryQuery>,
) -> axum::response::Response {
    let filter = match query.into_filter() {
        Ok(filter) => filter,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string())
        }
    };

    match services.store.history(&filter).await {
        Ok(page) => {
            let tasks: Vec<dto::TaskResponse> =
                page.tasks.iter().map(dto::TaskResponse::from).collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "tasks": tasks,
                    "total": page.total,
                    "limit": page.limit,
                    "offset": page.offset,
                })),
            )
                .into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn stats(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.store.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
