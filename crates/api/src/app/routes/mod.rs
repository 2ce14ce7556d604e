use axum::Router;

pub mod push;
pub mod queue;
pub mod system;

/// Router for all authenticated endpoints (mounted under `/api/v1`).
pub fn router() -> Router {
    Router::new()
        .nest("/push", push::router())
        .nest("/queue", queue::router())
}
