//! End-to-end: publisher -> in-memory channel -> worker -> SQLite.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use mathlog::channel::{EventChannel, MemoryChannel};
use mathlog::fallback::FallbackSink;
use mathlog::publisher::Publisher;
use mathlog::shutdown::ShutdownSignal;
use mathlog::store::{self, LogStore, SqliteLogStore};
use mathlog::worker::{LogWorker, WorkerError, WorkerStats};
use mathlog::{LogEvent, LOG_CHANNEL};

struct Harness {
    channel: MemoryChannel,
    publisher: Publisher,
    reader: SqliteLogStore,
    worker: tokio::task::JoinHandle<(WorkerStats, Result<WorkerStats, WorkerError>)>,
    dir: tempfile::TempDir,
}

async fn start() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("data").join("math.db").display());
    let pool = store::connect(&url, 2).await.unwrap();

    let channel = MemoryChannel::new();
    let publisher = Publisher::new(
        Arc::new(channel.clone()),
        FallbackSink::new(dir.path().join("log_fallback.log")),
    );

    let mut worker = LogWorker::new(
        Arc::new(channel.clone()),
        SqliteLogStore::new(pool.clone()),
        LOG_CHANNEL,
    )
    .with_name("pipeline-worker");
    let worker = tokio::spawn(async move {
        let result = worker.run(&ShutdownSignal::new()).await;
        (worker.stats(), result)
    });

    while channel.subscriber_count(LOG_CHANNEL).await == 0 {
        tokio::task::yield_now().await;
    }

    Harness {
        channel,
        publisher,
        reader: SqliteLogStore::new(pool),
        worker,
        dir,
    }
}

/// Close the transport; the worker drains what it already received and
/// then reports the lost subscription as an error.
async fn finish(harness: &mut Harness) -> WorkerStats {
    harness.channel.close().await;
    let (stats, result) = tokio::time::timeout(Duration::from_secs(5), &mut harness.worker)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(WorkerError::ChannelClosed { .. })));
    stats
}

#[tokio::test]
async fn test_completed_event_is_persisted() {
    let mut harness = start().await;

    harness
        .publisher
        .publish_event(LogEvent::new("fib", "alice", json!({"n": 7}), json!(13)))
        .await;

    let stats = finish(&mut harness).await;
    assert_eq!(stats.persisted, 1);

    let logs = harness.reader.paginated_logs(1, 20).await.unwrap();
    assert_eq!(logs.len(), 1);
    let record = &logs[0];
    assert_eq!(record.event, "operation_completed");
    assert_eq!(record.level, "INFO");
    assert_eq!(record.user, "alice");
    assert_eq!(record.operation, "fib");
    assert_eq!(record.input, r#"{"n":7}"#);
    assert_eq!(record.result, "13");
}

#[tokio::test]
async fn test_malformed_message_does_not_block_next_one() {
    let mut harness = start().await;

    harness.channel.publish(LOG_CHANNEL, "not json").await.unwrap();
    harness
        .channel
        .publish(LOG_CHANNEL, r#"{"event":"operation_completed"}"#)
        .await
        .unwrap();
    harness
        .publisher
        .publish_event(LogEvent::new("factorial", "bob", json!({"n": 5}), json!(120)))
        .await;

    let stats = finish(&mut harness).await;
    assert_eq!(stats.malformed, 2);
    assert_eq!(stats.persisted, 1);
    assert_eq!(harness.reader.count().await.unwrap(), 1);

    let logs = harness.reader.paginated_logs(1, 20).await.unwrap();
    assert_eq!(logs[0].operation, "factorial");
    assert_eq!(logs[0].result, "120");
}

#[tokio::test]
async fn test_null_result_stored_as_no_result() {
    let mut harness = start().await;

    let message = json!({
        "event": "operation_failed",
        "level": "ERROR",
        "user": "anonymous",
        "operation": "GET /logs",
        "input": {},
        "result": null,
    });
    harness.publisher.publish(LOG_CHANNEL, &message).await;

    finish(&mut harness).await;
    let logs = harness.reader.paginated_logs(1, 20).await.unwrap();
    assert_eq!(logs[0].result, "no result");
    assert_eq!(logs[0].input, "{}");
}

#[tokio::test]
async fn test_newest_first_across_pages() {
    let mut harness = start().await;

    for n in 0..5 {
        harness
            .publisher
            .publish_event(LogEvent::new("fib", "alice", json!({"n": n}), json!(n)))
            .await;
    }

    finish(&mut harness).await;
    let first = harness.reader.paginated_logs(1, 3).await.unwrap();
    let second = harness.reader.paginated_logs(2, 3).await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 2);
    assert_eq!(first[0].input, r#"{"n":4}"#);
    assert_eq!(second[1].input, r#"{"n":0}"#);
}

#[tokio::test]
async fn test_closed_channel_goes_to_fallback_file() {
    let mut harness = start().await;
    finish(&mut harness).await;

    harness
        .publisher
        .publish_event(LogEvent::new("pow", "carol", json!({"base": 2.0, "exponent": 3.0}), json!(8.0)))
        .await;

    let contents =
        std::fs::read_to_string(harness.dir.path().join("log_fallback.log")).unwrap();
    assert_eq!(contents.lines().count(), 1);
    assert!(contents.starts_with("[logs] {"));
    assert!(contents.contains(r#""user":"carol""#));
    assert_eq!(harness.reader.count().await.unwrap(), 0);
}
