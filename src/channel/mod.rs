//! Pub/sub transport for log events.
//!
//! The [`EventChannel`] trait decouples producers and the worker from the
//! concrete broker. Delivery is at-most-once: a channel keeps no messages,
//! offers no replay and returns no acknowledgment.
//!
//! ## Built-in Transports
//!
//! - [`RedisChannel`]: Redis `PUBLISH` / `SUBSCRIBE`
//! - [`MemoryChannel`]: in-process broadcast, used by tests and local runs

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryChannel;
pub use self::redis::RedisChannel;

/// Errors raised by a transport.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The transport could not be reached
    #[error("connection error: {0}")]
    Connection(String),

    /// The transport rejected a command
    #[error("command error: {0}")]
    Command(String),

    /// The channel has been closed
    #[error("channel closed")]
    Closed,
}

/// A message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// An application payload (UTF-8 JSON text for log events)
    Payload(String),

    /// A transport notice such as a subscription confirmation
    Control(String),

    /// Payload bytes that are not valid UTF-8
    Undecodable(Vec<u8>),
}

/// A live subscription to one topic.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message.
    ///
    /// Returns `None` once the transport has closed the subscription.
    async fn next_message(&mut self) -> Option<ChannelMessage>;
}

/// A named-topic publish/subscribe transport.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Short transport name used in diagnostics
    fn name(&self) -> &str;

    /// Publish a payload to `topic`.
    ///
    /// Succeeds even when nobody is subscribed; the message is then lost.
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), ChannelError>;

    /// Subscribe to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, ChannelError>;
}
