//! JSON API: the producers of the log pipeline.
//!
//! | Route             | Auth | Publishes                  |
//! |-------------------|------|----------------------------|
//! | `GET /health`     | no   | -                          |
//! | `POST /fibonacci` | yes  | `operation_completed`      |
//! | `POST /power`     | yes  | `operation_completed`      |
//! | `POST /factorial` | yes  | `operation_completed`      |
//! | `GET /logs`       | yes  | -                          |
//!
//! Any 4xx/5xx response, including unknown routes, publishes
//! `operation_failed`.

pub mod auth;
pub mod error;
pub mod logs;
pub mod math;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::cache::ResultCache;
use crate::publisher::Publisher;
use crate::store::LogStore;
use auth::JwtVerifier;

/// Shared handler state.
pub struct AppState {
    pub publisher: Arc<Publisher>,
    pub log_channel: String,
    pub cache: Arc<dyn ResultCache>,
    pub cache_ttl: Duration,
    pub store: Arc<dyn LogStore>,
    pub verifier: JwtVerifier,
}

/// Assemble the HTTP router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/fibonacci", post(math::compute_fibonacci))
        .route("/power", post(math::compute_power))
        .route("/factorial", post(math::compute_factorial))
        .route("/logs", get(logs::list_logs))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            error::log_failed_requests,
        ))
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Result<Json<Value>, StatusCode> {
    state.store.count().await.map_err(|e| {
        error!(error = %e, "Health check: log store unavailable");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(json!({ "status": "ok", "database": "connected" })))
}
