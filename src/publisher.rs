//! Producer side of the log pipeline.
//!
//! [`Publisher::publish`] is fire-and-forget: it validates and serializes
//! the event, hands it to the [`EventChannel`], and on any failure writes a
//! line to the [`FallbackSink`] instead. Nothing is returned to the caller,
//! so logging can never break the request that triggered it.
//!
//! # Example
//!
//! ```rust,ignore
//! use mathlog::event::{build_log_message, level, EVENT_COMPLETED};
//!
//! let message = build_log_message("fib", json!({"n": 7}), &13, "alice", level::INFO, EVENT_COMPLETED);
//! publisher.publish(LOG_CHANNEL, &message).await;
//! ```

use crate::channel::{ChannelError, EventChannel};
use crate::event::LogEvent;
use crate::fallback::FallbackSink;
use crate::LOG_CHANNEL;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Default upper bound on a single channel publish
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(500);

/// Reasons a publish fell back to the file sink.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("channel name must be a non-empty string")]
    EmptyChannel,

    #[error("event must be a non-empty JSON object")]
    InvalidEvent,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("publish timed out after {0}ms")]
    Timeout(u128),

    #[error("transport error: {0}")]
    Channel(#[from] ChannelError),
}

/// Best-effort event publisher with file fallback.
pub struct Publisher {
    channel: Arc<dyn EventChannel>,
    fallback: FallbackSink,
    timeout: Duration,
}

impl Publisher {
    pub fn new(channel: Arc<dyn EventChannel>, fallback: FallbackSink) -> Self {
        Self {
            channel,
            fallback,
            timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    /// Bound the time spent waiting on the channel.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn fallback(&self) -> &FallbackSink {
        &self.fallback
    }

    /// Publish `event` on `channel_name`. Never fails.
    pub async fn publish(&self, channel_name: &str, event: &Value) {
        let err = match self.try_publish(channel_name, event).await {
            Ok(()) => return,
            Err(e) => e,
        };

        warn!(
            channel = %channel_name,
            transport = %self.channel.name(),
            error = %err,
            "Log publish failed, writing to fallback sink"
        );

        if let Err(file_err) = self.fallback.append(channel_name, event).await {
            error!(
                channel = %channel_name,
                path = %self.fallback.path().display(),
                error = %file_err,
                event = %event,
                "Fallback sink write failed, log event dropped"
            );
        }
    }

    /// Publish a typed event on [`LOG_CHANNEL`].
    pub async fn publish_event(&self, event: LogEvent) {
        self.publish(LOG_CHANNEL, &event.into_message()).await;
    }

    async fn try_publish(&self, channel_name: &str, event: &Value) -> Result<(), PublishError> {
        if channel_name.trim().is_empty() {
            return Err(PublishError::EmptyChannel);
        }
        match event {
            Value::Object(map) if !map.is_empty() => {}
            _ => return Err(PublishError::InvalidEvent),
        }

        let payload = serde_json::to_string(event)?;

        tokio::time::timeout(self.timeout, self.channel.publish(channel_name, &payload))
            .await
            .map_err(|_| PublishError::Timeout(self.timeout.as_millis()))??;

        debug!(channel = %channel_name, bytes = payload.len(), "Log event published");
        Ok(())
    }
}
