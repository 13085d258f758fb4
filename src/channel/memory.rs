//! In-process broadcast transport.
//!
//! Mirrors Redis pub/sub semantics closely enough for tests: each
//! subscription first yields a `subscribe` control notice, messages
//! published before a subscription exists are dropped, and a subscriber
//! that falls more than the buffer size behind loses messages.

use super::{ChannelError, ChannelMessage, EventChannel, Subscription};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

/// Default per-topic buffer size
const DEFAULT_CAPACITY: usize = 1024;

#[derive(Default)]
struct Topics {
    senders: HashMap<String, broadcast::Sender<String>>,
    closed: bool,
}

/// Broadcast-backed [`EventChannel`].
///
/// Clones share the same topics.
#[derive(Clone)]
pub struct MemoryChannel {
    topics: Arc<Mutex<Topics>>,
    capacity: usize,
}

impl MemoryChannel {
    /// Create a channel with the default buffer size.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a channel with a custom per-topic buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(Topics::default())),
            capacity: capacity.max(1),
        }
    }

    /// Close the channel.
    ///
    /// Open subscriptions end after draining buffered messages and later
    /// publishes fail with [`ChannelError::Closed`].
    pub async fn close(&self) {
        let mut topics = self.topics.lock().await;
        topics.closed = true;
        topics.senders.clear();
    }

    /// Number of live subscribers on `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().await;
        topics
            .senders
            .get(topic)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventChannel for MemoryChannel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<(), ChannelError> {
        let topics = self.topics.lock().await;
        if topics.closed {
            return Err(ChannelError::Closed);
        }

        if let Some(sender) = topics.senders.get(topic) {
            // No receivers means nobody is listening: the message is lost.
            let _ = sender.send(payload.to_string());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Box<dyn Subscription>, ChannelError> {
        let mut topics = self.topics.lock().await;
        if topics.closed {
            return Err(ChannelError::Closed);
        }

        let capacity = self.capacity;
        let receiver = topics
            .senders
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe();

        let mut pending = VecDeque::new();
        pending.push_back(ChannelMessage::Control("subscribe".to_string()));

        Ok(Box::new(MemorySubscription {
            topic: topic.to_string(),
            receiver,
            pending,
        }))
    }
}

struct MemorySubscription {
    topic: String,
    receiver: broadcast::Receiver<String>,
    pending: VecDeque<ChannelMessage>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Option<ChannelMessage> {
        if let Some(message) = self.pending.pop_front() {
            return Some(message);
        }

        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(ChannelMessage::Payload(payload)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        topic = %self.topic,
                        skipped = skipped,
                        "Subscriber lagged, messages lost"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_yields_control_first() {
        let channel = MemoryChannel::new();
        let mut sub = channel.subscribe("logs").await.unwrap();

        channel.publish("logs", "hello").await.unwrap();

        assert_eq!(
            sub.next_message().await,
            Some(ChannelMessage::Control("subscribe".to_string()))
        );
        assert_eq!(
            sub.next_message().await,
            Some(ChannelMessage::Payload("hello".to_string()))
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_lost() {
        let channel = MemoryChannel::new();
        channel.publish("logs", "early").await.unwrap();

        let mut sub = channel.subscribe("logs").await.unwrap();
        channel.publish("logs", "late").await.unwrap();

        sub.next_message().await; // subscribe notice
        assert_eq!(
            sub.next_message().await,
            Some(ChannelMessage::Payload("late".to_string()))
        );
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let channel = MemoryChannel::new();
        let mut sub = channel.subscribe("logs").await.unwrap();

        channel.publish("other", "ignored").await.unwrap();
        channel.publish("logs", "wanted").await.unwrap();

        sub.next_message().await;
        assert_eq!(
            sub.next_message().await,
            Some(ChannelMessage::Payload("wanted".to_string()))
        );
    }

    #[tokio::test]
    async fn test_close_ends_subscriptions_and_rejects_publish() {
        let channel = MemoryChannel::new();
        let mut sub = channel.subscribe("logs").await.unwrap();
        assert_eq!(channel.subscriber_count("logs").await, 1);

        channel.publish("logs", "buffered").await.unwrap();
        channel.close().await;

        sub.next_message().await;
        assert_eq!(
            sub.next_message().await,
            Some(ChannelMessage::Payload("buffered".to_string()))
        );
        assert_eq!(sub.next_message().await, None);

        assert!(matches!(
            channel.publish("logs", "x").await,
            Err(ChannelError::Closed)
        ));
        assert!(channel.subscribe("logs").await.is_err());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_loses_messages() {
        let channel = MemoryChannel::with_capacity(2);
        let mut sub = channel.subscribe("logs").await.unwrap();

        for i in 0..5 {
            channel.publish("logs", &i.to_string()).await.unwrap();
        }

        sub.next_message().await;
        assert_eq!(
            sub.next_message().await,
            Some(ChannelMessage::Payload("3".to_string()))
        );
    }
}
