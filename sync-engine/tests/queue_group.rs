mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{RecordingCatalog, ts, wait_until};
use shared::message::{EventType, FileInfo};
use sync_engine::broker::{Broker, MemoryBroker};
use sync_engine::sync::{EventConsumer, SyncHandlers};
use tokio_util::sync::CancellationToken;

fn consumer(
    broker: &MemoryBroker,
    source: &Arc<RecordingCatalog>,
    destination: &Arc<RecordingCatalog>,
    ack_wait: Duration,
    token: &CancellationToken,
) -> Arc<EventConsumer> {
    EventConsumer::new(
        Arc::new(broker.clone()),
        SyncHandlers::new(source.clone(), destination.clone()),
        ack_wait,
        token.clone(),
    )
}

#[tokio::test]
async fn test_competing_consumers_handle_each_event_once() {
    let broker = MemoryBroker::new();
    let source = RecordingCatalog::new();
    let destination = RecordingCatalog::new();
    source.inner.write_version("B1", "F1", "V1", ts(1), "payload");

    let token = CancellationToken::new();
    let first = consumer(&broker, &source, &destination, Duration::from_secs(30), &token);
    let second = consumer(&broker, &source, &destination, Duration::from_secs(30), &token);
    first.start_subscription(EventType::FileNew).await.unwrap();
    second.start_subscription(EventType::FileNew).await.unwrap();
    assert_eq!(broker.members("file_new", "file_new", "file_new"), 2);

    let data = FileInfo::new("B1", "F1", "V1").to_bytes().unwrap();
    broker.publish("file_new", data).await.unwrap();

    assert!(wait_until(|| destination.inner.content("B1", "F1", "V1").is_some()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.calls_starting_with("get B1/F1@V1").len(), 1);

    token.cancel();
    assert!(wait_until(|| first.is_closed() && second.is_closed()).await);
}

#[tokio::test]
async fn test_failed_event_is_redelivered_after_ack_wait() {
    let broker = MemoryBroker::new();
    let source = RecordingCatalog::new();
    let destination = RecordingCatalog::new();
    source.inner.write_version("B1", "F1", "V2", ts(2), "update");
    source.flaky_fetches(1);

    let token = CancellationToken::new();
    let consumer = consumer(&broker, &source, &destination, Duration::from_millis(50), &token);
    consumer
        .start_subscription(EventType::FileUpdate)
        .await
        .unwrap();

    let data = FileInfo::new("B1", "F1", "V2").to_bytes().unwrap();
    broker.publish("file_update", data).await.unwrap();

    assert!(wait_until(|| destination.inner.content("B1", "F1", "V2").is_some()).await);
    assert_eq!(source.calls_starting_with("get B1/F1@V2").len(), 2);

    consumer.close().await.unwrap();
}

#[tokio::test]
async fn test_undecodable_payload_is_never_acked() {
    let broker = MemoryBroker::new();
    let source = RecordingCatalog::new();
    let destination = RecordingCatalog::new();

    let token = CancellationToken::new();
    let consumer = consumer(&broker, &source, &destination, Duration::from_secs(30), &token);
    consumer
        .start_subscription(EventType::FileDelete)
        .await
        .unwrap();

    broker
        .publish("file_delete", b"not json".to_vec())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(destination.calls().is_empty());
    consumer.close().await.unwrap();
}

#[tokio::test]
async fn test_delete_event_records_tombstone() {
    let broker = MemoryBroker::new();
    let source = RecordingCatalog::new();
    let destination = RecordingCatalog::new();
    destination.inner.write_version("B1", "F1", "V1", ts(1), "old");

    let token = CancellationToken::new();
    let consumer = consumer(&broker, &source, &destination, Duration::from_secs(30), &token);
    consumer
        .start_subscription(EventType::FileDelete)
        .await
        .unwrap();

    let data = FileInfo::new("B1", "F1", "V2").to_bytes().unwrap();
    broker.publish("file_delete", data).await.unwrap();

    assert!(wait_until(|| destination.inner.versions("B1", "F1").len() == 2).await);
    // 删除不读取源端
    assert!(source.calls().is_empty());
    consumer.close().await.unwrap();
}
