//! HTTP application wiring (axum router + service wiring).
//!
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs, validation, JSON mapping
//! - `errors.rs`: consistent error responses

use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::{routing::get, Extension, Router};
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;

use pushrelay_infra::store::TaskStore;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Dependencies shared by all handlers.
pub struct AppServices {
    pub store: Arc<dyn TaskStore>,
    /// Attempt cap applied when a request does not specify one.
    pub default_max_attempts: i32,
}

/// Build the full HTTP router (public entrypoint used by `main.rs` and the
/// black-box tests).
pub fn build_app(
    services: Arc<AppServices>,
    auth_token: Option<String>,
    request_timeout: Duration,
) -> Router {
    let auth_state = middleware::AuthState { token: auth_token };

    // Application endpoints: bearer auth required.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api/v1", protected)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|_: tower::BoxError| async {
                    StatusCode::REQUEST_TIMEOUT
                }))
                .layer(TimeoutLayer::new(request_timeout)),
        )
}
