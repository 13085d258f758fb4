//! Durable log records in SQLite.
//!
//! The worker writes one [`LogRecord`] per decoded event; the API reads
//! them back a page at a time, newest first.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::event::LogEvent;

/// Stored when an event carries no result.
pub const NO_RESULT: &str = "no result";

/// Default page size for [`LogStore::paginated_logs`] callers.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Errors raised by the log store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("page and page size must be positive (page={page}, page_size={page_size})")]
    InvalidPage { page: u32, page_size: u32 },
}

/// A persisted log event.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct LogRecord {
    pub id: i64,
    pub event: String,
    pub level: String,
    /// Time the worker persisted the event
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub operation: String,
    /// Serialized JSON of the event input
    pub input: String,
    pub result: String,
}

/// A record ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogRecord {
    pub event: String,
    pub level: String,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub operation: String,
    pub input: String,
    pub result: String,
}

impl NewLogRecord {
    /// Map a decoded event to its durable form, stamped with `received_at`.
    pub fn from_event(event: LogEvent, received_at: DateTime<Utc>) -> Self {
        Self {
            event: event.event,
            level: event.level,
            timestamp: received_at,
            user: event.user,
            operation: event.operation,
            input: event.input.to_string(),
            result: result_text(event.result),
        }
    }
}

/// Text form of a result: strings unquoted, other JSON compact.
fn result_text(result: Option<Value>) -> String {
    match result {
        None | Some(Value::Null) => NO_RESULT.to_string(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

/// Fixed-width UTC text, so lexical order equals time order.
fn timestamp_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Persistence boundary used by the worker and the API.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Create the schema if absent. Safe to call repeatedly.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Insert and commit one record.
    async fn create_record(&self, record: NewLogRecord) -> Result<LogRecord, StoreError>;

    /// One page of records, newest first. Pages are 1-based.
    async fn paginated_logs(&self, page: u32, page_size: u32)
        -> Result<Vec<LogRecord>, StoreError>;

    /// Total number of stored records.
    async fn count(&self) -> Result<i64, StoreError>;
}

/// [`LogStore`] backed by an sqlx SQLite pool.
#[derive(Clone)]
pub struct SqliteLogStore {
    pool: SqlitePool,
}

impl SqliteLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event TEXT NOT NULL,
                level TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                user TEXT NOT NULL,
                operation TEXT NOT NULL,
                input TEXT NOT NULL,
                result TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_logs_timestamp ON logs (timestamp DESC, id DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_record(&self, record: NewLogRecord) -> Result<LogRecord, StoreError> {
        // Dropping the transaction on any early return rolls it back and
        // hands the connection back to the pool.
        let mut tx = self.pool.begin().await?;

        let row: LogRecord = sqlx::query_as(
            r#"INSERT INTO logs (event, level, timestamp, user, operation, input, result)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               RETURNING id, event, level, timestamp, user, operation, input, result"#,
        )
        .bind(&record.event)
        .bind(&record.level)
        .bind(timestamp_text(&record.timestamp))
        .bind(&record.user)
        .bind(&record.operation)
        .bind(&record.input)
        .bind(&record.result)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(id = row.id, operation = %row.operation, "Log record committed");
        Ok(row)
    }

    async fn paginated_logs(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<LogRecord>, StoreError> {
        if page == 0 || page_size == 0 {
            return Err(StoreError::InvalidPage { page, page_size });
        }

        let offset = (i64::from(page) - 1) * i64::from(page_size);

        let rows: Vec<LogRecord> = sqlx::query_as(
            r#"SELECT id, event, level, timestamp, user, operation, input, result
               FROM logs
               ORDER BY timestamp DESC, id DESC
               LIMIT ? OFFSET ?"#,
        )
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn count(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM logs")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Open an SQLite pool, creating the database file and its directory.
pub async fn connect(db_url: &str, max_connections: u32) -> Result<SqlitePool, StoreError> {
    ensure_parent_dir(db_url);

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Create the parent folder of a file-backed sqlx SQLite URL.
fn ensure_parent_dir(db_url: &str) {
    let Some(path_part) = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))
    else {
        return;
    };
    let path_only = path_part.split('?').next().unwrap_or_default();
    if path_only.is_empty() || path_only == ":memory:" {
        return;
    }
    if let Some(parent) = Path::new(path_only).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
}
