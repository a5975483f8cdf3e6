//! Reliable write path against real store backends.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use receipt_gateway::infra::{
    BroadcastSink, ExhaustionPolicy, ReceiptProcessor, ReceiptStore, ReliableWriter, RetryConfig,
    ShutdownCoordinator, WriteError, WriteOutcome,
};
use receipt_gateway::metrics::{metric_names, MetricsRegistry};

use common::*;

#[tokio::test]
async fn transient_failure_stores_and_delivers_once() {
    let inner: Arc<dyn ReceiptStore> = Arc::new(memory_store());
    let store = Arc::new(FlakyStore::new(inner.clone(), 1));
    let sink = Arc::new(RecordingSink::default());
    let metrics = Arc::new(MetricsRegistry::new());

    let writer = ReliableWriter::new(store.clone(), sink.clone(), RetryConfig::fast())
        .with_metrics(metrics.clone());

    let outcome = writer
        .write("tx-1", transfer("tx-1", Some("alice"), Some("bob")))
        .await
        .unwrap();

    assert_eq!(outcome, WriteOutcome::Inserted { attempts: 2 });
    assert_eq!(store.insert_calls(), 2);

    let all = inner
        .query(&receipt_gateway::ReceiptFilter::new())
        .await
        .unwrap();
    assert_eq!(ids(&all), vec!["tx-1"]);

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["_id"], "tx-1");
    assert!(delivered[0].contains_key("receivedAt"));

    assert_eq!(metrics.get_counter(metric_names::WRITE_RETRIES).await, 1);
    assert_eq!(metrics.get_counter(metric_names::RECEIPTS_INSERTED).await, 1);
}

#[tokio::test]
async fn rewriting_an_id_keeps_the_first_document() {
    let store: Arc<dyn ReceiptStore> = Arc::new(memory_store());
    let sink = Arc::new(RecordingSink::default());
    let writer = ReliableWriter::new(store.clone(), sink.clone(), RetryConfig::fast());

    let first = writer
        .write("same", receipt(json!({"attempt": "first"})))
        .await
        .unwrap();
    let second = writer
        .write("same", receipt(json!({"attempt": "second"})))
        .await
        .unwrap();

    assert!(matches!(first, WriteOutcome::Inserted { .. }));
    assert!(matches!(second, WriteOutcome::Duplicate { .. }));
    assert_eq!(sink.count(), 1);

    let stored = store.get_by_id("same").await.unwrap().unwrap();
    assert_eq!(stored["attempt"], "first");
}

#[tokio::test]
async fn exhausted_write_reaches_the_supervisor() {
    let inner: Arc<dyn ReceiptStore> = Arc::new(memory_store());
    let store = Arc::new(FlakyStore::new(inner, u32::MAX));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let writer = Arc::new(
        ReliableWriter::new(
            store,
            Arc::new(RecordingSink::default()),
            RetryConfig::fast().with_timeout(Duration::from_millis(40)),
        )
        .with_exhaustion_policy(ExhaustionPolicy::Fatal, Some(tx)),
    );

    writer.spawn("doomed".into(), receipt(json!({}))).await.unwrap();

    let err = rx.recv().await.unwrap();
    assert!(err.is_exhausted());
    assert_eq!(err.id(), "doomed");
    match err {
        WriteError::RetryExhausted { attempts, .. } => assert!(attempts >= 2),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn shutdown_abandons_backoff() {
    let inner: Arc<dyn ReceiptStore> = Arc::new(memory_store());
    let store = Arc::new(FlakyStore::new(inner, u32::MAX));
    let coordinator = ShutdownCoordinator::new();

    let writer = ReliableWriter::new(
        store,
        Arc::new(RecordingSink::default()),
        RetryConfig::default(),
    )
    .with_shutdown(coordinator.signal());

    let write = tokio::spawn(async move { writer.write("pending", receipt(json!({}))).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    coordinator.shutdown().await;

    let result = tokio::time::timeout(Duration::from_secs(2), write)
        .await
        .expect("write should stop promptly")
        .unwrap();
    assert!(matches!(result, Err(WriteError::Cancelled { .. })));
}

#[tokio::test]
async fn processor_ingests_and_pushes_to_subscribers() {
    let store: Arc<dyn ReceiptStore> = Arc::new(memory_store());
    let sink = BroadcastSink::default();
    let mut subscriber = sink.subscribe();

    let writer = Arc::new(ReliableWriter::new(
        store.clone(),
        Arc::new(sink.clone()),
        RetryConfig::fast(),
    ));
    let processor = ReceiptProcessor::new(writer.clone());

    let message = json!({
        "headers": { "requestId": "req-42", "reqOffset": "7", "type": "TransactionSuccess" },
        "transactionHash": "0x42",
        "from": "alice"
    });
    let id = processor
        .process_receipt(message.to_string().as_bytes())
        .await
        .unwrap();
    assert_eq!(id, "req-42");

    let pushed = tokio::time::timeout(Duration::from_secs(2), subscriber.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pushed["_id"], "req-42");

    assert!(writer.in_flight().wait_for_drain(Duration::from_secs(2)).await);
    let stored = store.get_by_id("req-42").await.unwrap().unwrap();
    assert_eq!(stored["transactionHash"], "0x42");
}

#[tokio::test]
async fn processor_rejects_messages_without_request_id() {
    let store: Arc<dyn ReceiptStore> = Arc::new(memory_store());
    let writer = Arc::new(ReliableWriter::new(
        store.clone(),
        Arc::new(RecordingSink::default()),
        RetryConfig::fast(),
    ));
    let processor = ReceiptProcessor::new(writer);

    assert!(processor.process_receipt(b"not json").await.is_err());
    assert!(processor.process_receipt(b"[1]").await.is_err());
    assert!(processor
        .process_receipt(br#"{"headers":{"type":"Error"}}"#)
        .await
        .is_err());

    let all = store
        .query(&receipt_gateway::ReceiptFilter::new())
        .await
        .unwrap();
    assert!(all.is_empty());
}
