//! The log worker: sole consumer of the log channel.
//!
//! ```text
//! INITIALIZING -> CONNECTING -> SUBSCRIBED -> [CONSUMING <-> PERSISTING]* -> STOPPED
//! ```
//!
//! Messages are handled one at a time in delivery order. A message that
//! does not decode, or whose insert fails, is logged and dropped; the loop
//! always moves on to the next message. There is no retry and no
//! dead-letter path: delivery is at-most-once.
//!
//! The loop ends when the [`ShutdownSignal`] fires or the transport closes
//! the subscription. Only the former is a clean exit: a lost connection is
//! reported as [`WorkerError::ChannelClosed`] so a supervisor restarts the
//! process. A message that has already been received is committed before
//! the shutdown flag is checked again.

use crate::channel::{ChannelError, ChannelMessage, EventChannel, Subscription};
use crate::event::LogEvent;
use crate::shutdown::ShutdownSignal;
use crate::store::{LogStore, NewLogRecord, StoreError};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Emit a statistics line every this many persisted events
const STATS_INTERVAL: u64 = 100;

/// Fatal worker errors. Per-message failures never surface here.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to subscribe to '{topic}': {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: ChannelError,
    },

    #[error("failed to initialize log store schema: {0}")]
    Schema(#[source] StoreError),

    #[error("subscription to '{topic}' closed by the transport")]
    ChannelClosed { topic: String },
}

/// Lifecycle states of a [`LogWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Initializing,
    Connecting,
    Subscribed,
    Consuming,
    Persisting,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Consuming => "consuming",
            Self::Persisting => "persisting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What happened to a single channel message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Committed with the given record id
    Persisted(i64),
    /// Control notice, not an event
    Ignored,
    /// Not a decodable log event; dropped
    Malformed,
    /// Decoded but the insert failed; dropped
    StoreFailed,
}

/// Running counters for one worker instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: u64,
    pub persisted: u64,
    pub malformed: u64,
    pub failed: u64,
    pub ignored: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &MessageOutcome) {
        match outcome {
            MessageOutcome::Ignored => self.ignored += 1,
            MessageOutcome::Persisted(_) => {
                self.received += 1;
                self.persisted += 1;
            }
            MessageOutcome::Malformed => {
                self.received += 1;
                self.malformed += 1;
            }
            MessageOutcome::StoreFailed => {
                self.received += 1;
                self.failed += 1;
            }
        }
    }
}

/// Consumes log events from a channel and persists them.
pub struct LogWorker<S> {
    channel: Arc<dyn EventChannel>,
    store: S,
    topic: String,
    name: String,
    state: WorkerState,
    stats: WorkerStats,
}

impl<S: LogStore> LogWorker<S> {
    pub fn new(channel: Arc<dyn EventChannel>, store: S, topic: impl Into<String>) -> Self {
        Self {
            channel,
            store,
            topic: topic.into(),
            name: "log-worker".to_string(),
            state: WorkerState::Initializing,
            stats: WorkerStats::default(),
        }
    }

    /// Set the name used in diagnostics
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Subscribe to the topic and make sure the store schema exists.
    ///
    /// Both failures are fatal: without either the worker has no purpose.
    pub async fn subscribe(&mut self) -> Result<Box<dyn Subscription>, WorkerError> {
        self.state = WorkerState::Connecting;
        info!(
            worker = %self.name,
            transport = %self.channel.name(),
            topic = %self.topic,
            "Connecting to log channel"
        );

        let subscription = match self.channel.subscribe(&self.topic).await {
            Ok(sub) => sub,
            Err(source) => {
                self.state = WorkerState::Stopped;
                return Err(WorkerError::Subscribe {
                    topic: self.topic.clone(),
                    source,
                });
            }
        };

        if let Err(e) = self.store.ensure_schema().await {
            self.state = WorkerState::Stopped;
            return Err(WorkerError::Schema(e));
        }

        self.state = WorkerState::Subscribed;
        info!(worker = %self.name, topic = %self.topic, "Log store ready, listening for events");
        Ok(subscription)
    }

    /// Subscribe and consume until shutdown fires.
    pub async fn run(&mut self, shutdown: &ShutdownSignal) -> Result<WorkerStats, WorkerError> {
        let mut subscription = self.subscribe().await?;
        self.consume(subscription.as_mut(), shutdown).await?;
        Ok(self.stats)
    }

    /// The consume loop over an existing subscription.
    ///
    /// Returns `Ok` on shutdown and [`WorkerError::ChannelClosed`] when the
    /// transport ends the subscription.
    pub async fn consume(
        &mut self,
        subscription: &mut dyn Subscription,
        shutdown: &ShutdownSignal,
    ) -> Result<(), WorkerError> {
        let result = loop {
            self.state = WorkerState::Consuming;

            let message = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    info!(worker = %self.name, "Shutdown requested, stopping consume loop");
                    break Ok(());
                }
                message = subscription.next_message() => message,
            };

            let Some(message) = message else {
                error!(worker = %self.name, topic = %self.topic, "Channel closed by transport");
                break Err(WorkerError::ChannelClosed {
                    topic: self.topic.clone(),
                });
            };

            self.handle_message(message).await;
        };

        self.state = WorkerState::Stopped;
        info!(
            worker = %self.name,
            received = self.stats.received,
            persisted = self.stats.persisted,
            malformed = self.stats.malformed,
            failed = self.stats.failed,
            "Log worker stopped"
        );
        result
    }

    /// Decode and persist one message. Never fails.
    pub async fn handle_message(&mut self, message: ChannelMessage) -> MessageOutcome {
        let outcome = match message {
            ChannelMessage::Control(kind) => {
                debug!(worker = %self.name, kind = %kind, "Ignoring control message");
                MessageOutcome::Ignored
            }
            ChannelMessage::Payload(payload) => self.persist_payload(&payload).await,
            ChannelMessage::Undecodable(bytes) => {
                error!(
                    worker = %self.name,
                    bytes = bytes.len(),
                    "Dropping log message that is not valid UTF-8"
                );
                MessageOutcome::Malformed
            }
        };

        self.stats.record(&outcome);

        if matches!(outcome, MessageOutcome::Persisted(_))
            && self.stats.persisted % STATS_INTERVAL == 0
        {
            info!(
                worker = %self.name,
                persisted = self.stats.persisted,
                malformed = self.stats.malformed,
                failed = self.stats.failed,
                "Worker statistics"
            );
        }

        outcome
    }

    async fn persist_payload(&mut self, payload: &str) -> MessageOutcome {
        let event: LogEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(e) => {
                error!(
                    worker = %self.name,
                    error = %e,
                    payload = %payload,
                    "Dropping malformed log message"
                );
                return MessageOutcome::Malformed;
            }
        };

        self.state = WorkerState::Persisting;
        let record = NewLogRecord::from_event(event, Utc::now());

        match self.store.create_record(record).await {
            Ok(saved) => {
                info!(
                    id = saved.id,
                    operation = %saved.operation,
                    user = %saved.user,
                    "Log saved"
                );
                MessageOutcome::Persisted(saved.id)
            }
            Err(e) => {
                error!(
                    worker = %self.name,
                    error = %e,
                    payload = %payload,
                    "Failed to save log, dropping event"
                );
                MessageOutcome::StoreFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::store::LogRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Mutex;

    /// Store double that keeps records in memory and can be told to fail.
    #[derive(Default)]
    struct RecordingStore {
        records: Mutex<Vec<LogRecord>>,
        next_id: AtomicI64,
        fail_inserts: AtomicBool,
        fail_schema: bool,
    }

    #[async_trait]
    impl LogStore for RecordingStore {
        async fn ensure_schema(&self) -> Result<(), StoreError> {
            if self.fail_schema {
                return Err(StoreError::Database(sqlx::Error::PoolClosed));
            }
            Ok(())
        }

        async fn create_record(&self, record: NewLogRecord) -> Result<LogRecord, StoreError> {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            let saved = LogRecord {
                id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                event: record.event,
                level: record.level,
                timestamp: record.timestamp,
                user: record.user,
                operation: record.operation,
                input: record.input,
                result: record.result,
            };
            self.records.lock().unwrap().push(saved.clone());
            Ok(saved)
        }

        async fn paginated_logs(&self, _: u32, _: u32) -> Result<Vec<LogRecord>, StoreError> {
            Ok(self.records.lock().unwrap().clone())
        }

        async fn count(&self) -> Result<i64, StoreError> {
            Ok(self.records.lock().unwrap().len() as i64)
        }
    }

    fn worker(store: RecordingStore) -> LogWorker<RecordingStore> {
        LogWorker::new(Arc::new(MemoryChannel::new()), store, "logs")
    }

    const VALID: &str = r#"{"event":"operation_completed","level":"INFO","user":"alice","operation":"fib","input":{"n":7},"result":13}"#;

    #[tokio::test]
    async fn test_valid_payload_persisted() {
        let mut worker = worker(RecordingStore::default());

        let before = Utc::now();
        let outcome = worker
            .handle_message(ChannelMessage::Payload(VALID.to_string()))
            .await;
        assert_eq!(outcome, MessageOutcome::Persisted(1));

        let records = worker.store().records.lock().unwrap().clone();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, "fib");
        assert_eq!(records[0].user, "alice");
        assert_eq!(records[0].result, "13");
        assert_eq!(records[0].input, r#"{"n":7}"#);
        assert!(records[0].timestamp >= before);
    }

    #[tokio::test]
    async fn test_control_messages_ignored() {
        let mut worker = worker(RecordingStore::default());

        let outcome = worker
            .handle_message(ChannelMessage::Control("subscribe".to_string()))
            .await;
        assert_eq!(outcome, MessageOutcome::Ignored);
        assert_eq!(worker.stats().received, 0);
        assert_eq!(worker.stats().ignored, 1);
    }

    #[tokio::test]
    async fn test_malformed_payloads_dropped() {
        let mut worker = worker(RecordingStore::default());

        for bad in ["not json", "[1,2,3]", r#"{"event":"x","level":"INFO"}"#] {
            let outcome = worker
                .handle_message(ChannelMessage::Payload(bad.to_string()))
                .await;
            assert_eq!(outcome, MessageOutcome::Malformed);
        }

        assert!(worker.store().records.lock().unwrap().is_empty());
        assert_eq!(worker.stats().malformed, 3);
    }

    #[tokio::test]
    async fn test_undecodable_payload_dropped() {
        let mut worker = worker(RecordingStore::default());

        let bytes = b"{\"event\":\"operation_completed\",\"level\":\"INFO\",\"user\":\"al\xffice\",\"operation\":\"fib\"}".to_vec();

        let outcome = worker
            .handle_message(ChannelMessage::Undecodable(bytes))
            .await;
        assert_eq!(outcome, MessageOutcome::Malformed);
        assert!(worker.store().records.lock().unwrap().is_empty());
        assert_eq!(worker.stats().malformed, 1);
    }

    #[tokio::test]
    async fn test_store_failure_does_not_stop_next_message() {
        let mut worker = worker(RecordingStore::default());

        worker.store().fail_inserts.store(true, Ordering::SeqCst);
        let failed = worker
            .handle_message(ChannelMessage::Payload(VALID.to_string()))
            .await;
        assert_eq!(failed, MessageOutcome::StoreFailed);

        worker.store().fail_inserts.store(false, Ordering::SeqCst);
        let ok = worker
            .handle_message(ChannelMessage::Payload(VALID.to_string()))
            .await;
        assert!(matches!(ok, MessageOutcome::Persisted(_)));

        let stats = worker.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.persisted, 1);
    }

    #[tokio::test]
    async fn test_schema_failure_is_fatal() {
        let store = RecordingStore {
            fail_schema: true,
            ..Default::default()
        };
        let mut worker = worker(store);

        let result = worker.run(&ShutdownSignal::new()).await;
        assert!(matches!(result, Err(WorkerError::Schema(_))));
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_fatal() {
        let channel = MemoryChannel::new();
        channel.close().await;
        let mut worker = LogWorker::new(Arc::new(channel), RecordingStore::default(), "logs");

        let result = worker.run(&ShutdownSignal::new()).await;
        assert!(matches!(result, Err(WorkerError::Subscribe { .. })));
    }

    #[tokio::test]
    async fn test_run_fails_when_channel_closes() {
        let channel = MemoryChannel::new();
        let mut worker = LogWorker::new(Arc::new(channel.clone()), RecordingStore::default(), "logs")
            .with_name("test-worker");

        let producer = channel.clone();
        tokio::spawn(async move {
            while producer.subscriber_count("logs").await == 0 {
                tokio::task::yield_now().await;
            }
            producer.publish("logs", VALID).await.unwrap();
            producer.publish("logs", "garbage").await.unwrap();
            producer.publish("logs", VALID).await.unwrap();
            producer.close().await;
        });

        let result = worker.run(&ShutdownSignal::new()).await;
        assert!(matches!(
            result,
            Err(WorkerError::ChannelClosed { ref topic }) if topic == "logs"
        ));

        let stats = worker.stats();
        assert_eq!(stats.persisted, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut worker = worker(RecordingStore::default());
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();

        let stats = tokio::time::timeout(std::time::Duration::from_secs(1), worker.run(&shutdown))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.received, 0);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(WorkerState::Persisting.to_string(), "persisting");
    }
}
