//! API errors and the failed-request logger.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

use super::auth::AuthUser;
use super::AppState;
use crate::event::{build_log_message, level, EVENT_FAILED};
use crate::math::MathError;
use crate::store::StoreError;

/// Username recorded for requests that never authenticated.
pub const ANONYMOUS: &str = "anonymous";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Internal(String),
}

/// Detail text of an error response, kept for the error logger.
#[derive(Debug, Clone)]
struct ErrorDetail(String);

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            Self::Internal(_) => "Internal Server Error".to_string(),
            other => other.to_string(),
        };

        let mut response = (status, Json(json!({ "detail": detail }))).into_response();
        response.extensions_mut().insert(ErrorDetail(self.to_string()));
        response
    }
}

impl From<MathError> for ApiError {
    fn from(e: MathError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidPage { .. } => Self::Validation(e.to_string()),
            StoreError::Database(db) => {
                error!(error = %db, "Log store query failed");
                Self::Internal(db.to_string())
            }
        }
    }
}

/// Publish an `operation_failed` event for every 4xx/5xx response.
pub async fn log_failed_requests(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;
    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let detail = response
        .extensions()
        .get::<ErrorDetail>()
        .map(|d| d.0.clone())
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_default();
    let user = response
        .extensions()
        .get::<AuthUser>()
        .map(|u| u.username.clone())
        .unwrap_or_else(|| ANONYMOUS.to_string());

    let message = build_log_message(
        &format!("{method} {path}"),
        json!({ "path": path, "method": method.as_str() }),
        &format!("{} - {}", status.as_u16(), detail),
        &user,
        level::ERROR,
        EVENT_FAILED,
    );
    state.publisher.publish(&state.log_channel, &message).await;

    response
}
