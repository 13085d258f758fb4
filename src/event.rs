//! Log event types shared by producers and the log worker.
//!
//! A [`LogEvent`] is the transient wire form of one structured log entry.
//! Producers build it with [`build_log_message`] (or the [`LogEvent`]
//! builder), publish it as JSON on the [`LOG_CHANNEL`](crate::LOG_CHANNEL)
//! topic, and the worker decodes it back before persisting.
//!
//! Events carry no timestamp. The worker stamps each record on receipt.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;

/// Tag for a successfully completed operation.
pub const EVENT_COMPLETED: &str = "operation_completed";

/// Tag for a failed request or operation.
pub const EVENT_FAILED: &str = "operation_failed";

/// Severity levels used on the wire.
pub mod level {
    pub const INFO: &str = "INFO";
    pub const WARNING: &str = "WARNING";
    pub const ERROR: &str = "ERROR";
}

/// One structured log event as published on the channel.
///
/// # Example
///
/// ```json
/// {
///   "event": "operation_completed",
///   "level": "INFO",
///   "user": "alice",
///   "operation": "fib",
///   "input": {"n": 7},
///   "result": 13
/// }
/// ```
///
/// Decoding requires the four string fields. `input` defaults to an empty
/// object and `result` may be absent or `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Event tag, e.g. `operation_completed`
    pub event: String,

    /// Severity, e.g. `INFO`
    pub level: String,

    /// Username snapshot of the caller
    pub user: String,

    /// Operation tag, e.g. `fib`
    pub operation: String,

    /// Operation input
    #[serde(default = "empty_object")]
    pub input: Value,

    /// Operation result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl LogEvent {
    /// Create a completed-operation event at `INFO` level.
    pub fn new(
        operation: impl Into<String>,
        user: impl Into<String>,
        input: Value,
        result: Value,
    ) -> Self {
        Self {
            event: EVENT_COMPLETED.to_string(),
            level: level::INFO.to_string(),
            user: user.into(),
            operation: operation.into(),
            input,
            result: Some(result),
        }
    }

    /// Set the severity level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Set the event tag
    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    /// Convert into the JSON mapping handed to the publisher.
    pub fn into_message(self) -> Value {
        let mut map = Map::new();
        map.insert("event".to_string(), Value::String(self.event));
        map.insert("level".to_string(), Value::String(self.level));
        map.insert("user".to_string(), Value::String(self.user));
        map.insert("operation".to_string(), Value::String(self.operation));
        map.insert("input".to_string(), self.input);
        map.insert("result".to_string(), self.result.unwrap_or(Value::Null));
        Value::Object(map)
    }
}

/// Assemble the canonical event mapping used by every producer.
///
/// Success and error paths share this shape; only `event` and `level`
/// differ. `result` is coerced with [`coerce_to_json`].
pub fn build_log_message<R>(
    operation: &str,
    input: Value,
    result: &R,
    user: &str,
    level: &str,
    event: &str,
) -> Value
where
    R: Serialize + Debug + ?Sized,
{
    LogEvent::new(operation, user, input, coerce_to_json(result))
        .with_level(level)
        .with_event(event)
        .into_message()
}

/// Convert any serializable value to JSON without failing.
///
/// Values serde_json rejects fall back to their `Debug` text. Non-finite
/// floats become their text form instead of `null`.
pub fn coerce_to_json<R>(value: &R) -> Value
where
    R: Serialize + Debug + ?Sized,
{
    match serde_json::to_value(value) {
        Ok(Value::Null) => {
            let text = format!("{value:?}");
            match text.as_str() {
                "inf" | "-inf" | "NaN" => Value::String(text),
                _ => Value::Null,
            }
        }
        Ok(v) => v,
        Err(_) => Value::String(format!("{value:?}")),
    }
}
