//! Math operation handlers.
//!
//! Each successful call publishes one `operation_completed` event. Integer
//! results are returned as decimal strings.

use axum::{
    extract::{Extension, State},
    response::Json,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Debug;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::ApiError;
use super::AppState;
use crate::cache::cache_or_compute;
use crate::event::{build_log_message, coerce_to_json, level, EVENT_COMPLETED};
use crate::math::{self, MathError};

#[derive(Debug, Deserialize)]
pub struct FibonacciRequest {
    pub n: u64,
}

#[derive(Debug, Deserialize)]
pub struct PowRequest {
    pub base: f64,
    pub exponent: f64,
}

#[derive(Debug, Deserialize)]
pub struct FactorialRequest {
    pub n: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MathOperationResponse {
    pub operation: String,
    pub input: Value,
    pub result: Value,
    pub user: String,
}

pub async fn compute_fibonacci(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<FibonacciRequest>,
) -> Result<Json<MathOperationResponse>, ApiError> {
    run_operation(&state, user, "fib", "fibonacci", json!({ "n": req.n }), || {
        math::fibonacci(req.n).map(|v| v.to_string())
    })
    .await
}

pub async fn compute_power(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<PowRequest>,
) -> Result<Json<MathOperationResponse>, ApiError> {
    let input = json!({ "base": req.base, "exponent": req.exponent });
    run_operation(&state, user, "pow", "power", input, || {
        math::power(req.base, req.exponent)
    })
    .await
}

pub async fn compute_factorial(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<FactorialRequest>,
) -> Result<Json<MathOperationResponse>, ApiError> {
    run_operation(&state, user, "factorial", "factorial", json!({ "n": req.n }), || {
        math::factorial(req.n).map(|v| v.to_string())
    })
    .await
}

/// Compute through the cache, publish the completion event, build the reply.
async fn run_operation<T, F>(
    state: &AppState,
    user: AuthUser,
    operation: &str,
    cache_operation: &str,
    input: Value,
    compute: F,
) -> Result<Json<MathOperationResponse>, ApiError>
where
    T: Serialize + DeserializeOwned + Debug,
    F: FnOnce() -> Result<T, MathError>,
{
    let result = cache_or_compute(
        state.cache.as_ref(),
        cache_operation,
        &input,
        state.cache_ttl,
        compute,
    )
    .await?;
    let result = coerce_to_json(&result);

    let message = build_log_message(
        operation,
        input.clone(),
        &result,
        &user.username,
        level::INFO,
        EVENT_COMPLETED,
    );
    state.publisher.publish(&state.log_channel, &message).await;

    Ok(Json(MathOperationResponse {
        operation: operation.to_string(),
        input,
        result,
        user: user.username,
    }))
}
