//! End-to-end: ingestion, windowed aggregation, live push and alerting wired
//! through one event bus.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use pulsewatch::alerts::{AlertDispatcher, AlertSink, InMemoryDirectory, NotificationTarget, NotifierError};
use pulsewatch::live::{FanoutBroadcaster, SubscriberRegistry};
use pulsewatch::pipeline::{
    EventBus, IngestionGateway, Thresholds, WindowOutcome, WindowedAggregator, DEFAULT_WINDOW,
};
use pulsewatch::storage::{ReadingStore, StorageEngine};
use pulsewatch::Status;

#[derive(Default)]
struct RecordingSink {
    sent: Mutex<Vec<String>>,
}

impl AlertSink for RecordingSink {
    fn deliver<'a>(
        &'a self,
        _target: &'a NotificationTarget,
        message: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifierError>> {
        Box::pin(async move {
            self.sent.lock().push(message.to_string());
            Ok(())
        })
    }
}

struct Harness {
    store: Arc<StorageEngine>,
    gateway: IngestionGateway,
    aggregator: WindowedAggregator,
    registry: Arc<SubscriberRegistry>,
    sink: Arc<RecordingSink>,
    broadcaster: FanoutBroadcaster,
    dispatcher: AlertDispatcher,
}

fn harness() -> Harness {
    let store = Arc::new(StorageEngine::new());
    let bus = Arc::new(EventBus::default());
    let thresholds = Thresholds::default();

    let gateway = IngestionGateway::new(store.clone(), thresholds, Arc::clone(&bus));
    let aggregator = WindowedAggregator::new(store.clone(), thresholds, Arc::clone(&bus), DEFAULT_WINDOW);

    let registry = Arc::new(SubscriberRegistry::default());
    let mut broadcaster = FanoutBroadcaster::new(Arc::clone(&registry));
    broadcaster.start(&bus);

    let sink = Arc::new(RecordingSink::default());
    let directory = Arc::new(InMemoryDirectory::with_external_ids(["1001"]));
    let mut dispatcher = AlertDispatcher::new(directory, sink.clone());
    dispatcher.start(&bus);

    Harness {
        store,
        gateway,
        aggregator,
        registry,
        sink,
        broadcaster,
        dispatcher,
    }
}

async fn next_event(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
    let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("subscriber channel closed");
    serde_json::from_str(&payload).unwrap()
}

/// Give spawned dispatch tasks a chance to run
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn normal_readings_reach_subscribers_without_alerts() {
    let mut h = harness();
    let (_id, mut rx) = h.registry.register();

    for _ in 0..3 {
        h.gateway.ingest(&json!({"number": 90})).unwrap();
    }

    let outcome = h
        .aggregator
        .run_window(Utc::now() + ChronoDuration::milliseconds(1))
        .unwrap();
    match outcome {
        WindowOutcome::Aggregated { aggregate, consumed } => {
            assert_eq!(aggregate.value, 90);
            assert_eq!(aggregate.status, Status::Normal);
            assert_eq!(consumed, 3);
        }
        WindowOutcome::Empty => panic!("expected an aggregate"),
    }

    for _ in 0..3 {
        let event = next_event(&mut rx).await;
        assert_eq!(event["type"], "reading");
        assert_eq!(event["value"], 90);
        assert_eq!(event["status"], "Normal");
    }
    let event = next_event(&mut rx).await;
    assert_eq!(event["type"], "bpm_result");
    assert_eq!(event["value"], 90);
    assert_eq!(event["status"], "Normal");

    settle().await;
    assert!(h.sink.sent.lock().is_empty());

    let stats = h.store.stats();
    assert_eq!(stats.readings, 0);
    assert_eq!(stats.aggregates, 1);

    h.broadcaster.stop().await;
    h.dispatcher.stop().await;
}

#[tokio::test]
async fn abnormal_values_alert_for_both_event_kinds() {
    let mut h = harness();

    h.gateway.ingest(&json!(130)).unwrap();
    h.aggregator
        .run_window(Utc::now() + ChronoDuration::milliseconds(1))
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while h.sink.sent.lock().len() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let sent = h.sink.sent.lock().clone();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().any(|m| m.starts_with("BPM Reading:") && m.contains("Status: High")));
    assert!(sent.iter().any(|m| m.starts_with("BPM Check Result:") && m.contains("Average Value: 130")));

    h.broadcaster.stop().await;
    h.dispatcher.stop().await;
}

#[tokio::test]
async fn empty_window_publishes_nothing() {
    let mut h = harness();
    let (_id, mut rx) = h.registry.register();

    let outcome = h.aggregator.run_window(Utc::now()).unwrap();
    assert_eq!(outcome, WindowOutcome::Empty);

    settle().await;
    assert!(rx.try_recv().is_err());
    assert_eq!(h.store.stats().aggregates, 0);

    h.broadcaster.stop().await;
    h.dispatcher.stop().await;
}
