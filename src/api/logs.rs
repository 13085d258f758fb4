//! Paginated read of persisted log records.

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use super::AppState;
use crate::store::{LogRecord, DEFAULT_PAGE_SIZE};

/// Largest page the API will serve.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LogsPage {
    pub page: u32,
    pub page_size: u32,
    pub total: i64,
    pub logs: Vec<LogRecord>,
}

pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsPage>, ApiError> {
    let page = query.page.unwrap_or(1);
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);

    let logs = state.store.paginated_logs(page, page_size).await?;
    let total = state.store.count().await?;

    Ok(Json(LogsPage {
        page,
        page_size,
        total,
        logs,
    }))
}
