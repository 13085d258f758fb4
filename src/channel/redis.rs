//! Redis pub/sub transport.
//!
//! Publishing goes through a `deadpool-redis` pool so request handlers
//! never open a connection per event. Each subscription owns a dedicated
//! pub/sub connection; when Redis drops it the subscription ends.
//!
//! Redis consumes subscribe confirmations inside the pub/sub connection, so
//! this transport yields [`ChannelMessage::Payload`], or
//! [`ChannelMessage::Undecodable`] for bytes that are not UTF-8.

use super::{ChannelError, ChannelMessage, EventChannel, Subscription};
use crate::config::RedisConfig;
use async_trait::async_trait;
use deadpool_redis::redis::{cmd, AsyncCommands, Client, Msg};
use deadpool_redis::{Config, Pool, Runtime};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tracing::{debug, info};

/// Redis-backed [`EventChannel`].
#[derive(Clone)]
pub struct RedisChannel {
    pool: Pool,
    client: Client,
}

impl RedisChannel {
    /// Build the channel without touching the network.
    ///
    /// Fails only when the URL cannot be parsed.
    pub fn new(config: &RedisConfig) -> Result<Self, ChannelError> {
        let pool = Config::from_url(config.url.clone())
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        let client =
            Client::open(config.url.as_str()).map_err(|e| ChannelError::Connection(e.to_string()))?;

        Ok(Self { pool, client })
    }

    /// Build the channel and verify Redis answers `PING`.
    pub async fn connect(config: &RedisConfig) -> Result<Self, ChannelError> {
        let channel = Self::new(config)?;
        channel.ping().await?;
        info!(url = %config.url, "Connected to Redis");
        Ok(channel)
    }

    /// Round-trip a `PING` through the publishing pool.
    pub async fn ping(&self) -> Result<(), ChannelError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let _: String = cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| ChannelError::Command(e.to_string()))?;
        Ok(())
    }

    /// The underlying connection pool, shared with the result cache.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl EventChannel for RedisChannel {
    fn name(&self) -> &str {
        "redis"
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), ChannelError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        let receivers: i64 = conn
            .publish(topic, payload)
            .await
            .map_err(|e| ChannelError::Command(e.to_string()))?;

        debug!(topic = %topic, receivers = receivers, "Published to Redis");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, ChannelError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;

        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| ChannelError::Command(e.to_string()))?;

        info!(topic = %topic, "Subscribed to Redis channel");

        Ok(Box::new(RedisSubscription {
            messages: Box::pin(pubsub.into_on_message()),
        }))
    }
}

struct RedisSubscription {
    messages: Pin<Box<dyn Stream<Item = Msg> + Send>>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_message(&mut self) -> Option<ChannelMessage> {
        let msg = self.messages.next().await?;
        Some(decode_payload(msg.get_payload_bytes()))
    }
}

fn decode_payload(bytes: &[u8]) -> ChannelMessage {
    match String::from_utf8(bytes.to_vec()) {
        Ok(payload) => ChannelMessage::Payload(payload),
        Err(e) => ChannelMessage::Undecodable(e.into_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deadpool_redis::redis::Value;

    fn message(payload: &[u8]) -> Msg {
        let frame = Value::Array(vec![
            Value::BulkString(b"message".to_vec()),
            Value::BulkString(b"logs".to_vec()),
            Value::BulkString(payload.to_vec()),
        ]);
        Msg::from_value(&frame).unwrap()
    }

    fn subscription(messages: Vec<Msg>) -> RedisSubscription {
        RedisSubscription {
            messages: Box::pin(futures::stream::iter(messages)),
        }
    }

    #[tokio::test]
    async fn test_subscription_keeps_invalid_utf8_undecoded() {
        let raw = b"{\"user\":\"al\xffice\"}".to_vec();
        let mut sub = subscription(vec![message(br#"{"user":"alice"}"#), message(&raw)]);

        assert_eq!(
            sub.next_message().await,
            Some(ChannelMessage::Payload(r#"{"user":"alice"}"#.to_string()))
        );
        assert_eq!(sub.next_message().await, Some(ChannelMessage::Undecodable(raw)));
        assert_eq!(sub.next_message().await, None);
    }

    #[test]
    fn test_new_rejects_bad_url() {
        let config = RedisConfig {
            url: "not a url".to_string(),
        };
        assert!(RedisChannel::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_new_is_lazy() {
        // Nothing listens on port 1; building must still succeed.
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
        };
        let channel = RedisChannel::new(&config).unwrap();
        assert_eq!(channel.name(), "redis");
    }

    #[tokio::test]
    async fn test_connect_fails_fast_when_unreachable() {
        let config = RedisConfig {
            url: "redis://127.0.0.1:1".to_string(),
        };
        assert!(RedisChannel::connect(&config).await.is_err());
    }
}
