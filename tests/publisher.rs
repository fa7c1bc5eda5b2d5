mod common;

use common::*;
use eventvisor::{EventKind, MemoryBroker};
use serde_json::json;

#[tokio::test]
async fn stale_session_is_replaced_transparently() {
    let broker = MemoryBroker::new();
    let cfg = fast_config();
    let publisher = publisher(&broker, &cfg);

    publisher.publish("ex", "k", &json!({"n": 1})).await.unwrap();
    broker.restart();
    publisher.publish("ex", "k", &json!({"n": 2})).await.unwrap();

    assert_eq!(broker.connect_count(), 2);
    assert_eq!(broker.live_sessions(), 1);
}

#[tokio::test]
async fn one_failed_connect_is_retried() {
    let broker = MemoryBroker::new();
    let cfg = fast_config();
    let publisher = publisher(&broker, &cfg);
    let mut events = publisher.bus().subscribe();

    publisher.publish("ex", "k", &1).await.unwrap();
    broker.restart();
    broker.refuse_connects(1);

    publisher.publish("ex", "k", &2).await.unwrap();
    let retry = wait_kind(&mut events, EventKind::PublisherRetry).await;
    assert!(retry.error.unwrap().contains("connection refused"));
    assert!(publisher.is_connected().await);
}

#[tokio::test]
async fn two_failed_connects_surface_to_the_caller() {
    let broker = MemoryBroker::new();
    let cfg = fast_config();
    let publisher = publisher(&broker, &cfg);
    broker.refuse_connects(2);

    let err = publisher.publish("ex", "k", &1).await.unwrap_err();
    assert!(err.is_connectivity());
    assert_eq!(err.as_label(), "connect_failed");
    assert!(!publisher.is_connected().await);

    // Nothing left to refuse: the next call connects.
    publisher.publish("ex", "k", &1).await.unwrap();
}

#[tokio::test]
async fn unreachable_broker_fails_after_one_retry() {
    let broker = MemoryBroker::new();
    broker.stop();
    let cfg = fast_config();
    let publisher = publisher(&broker, &cfg);
    let mut events = publisher.bus().subscribe();

    assert!(publisher.publish("ex", "k", "hello").await.is_err());
    wait_kind(&mut events, EventKind::PublisherRetry).await;
    assert_eq!(broker.connect_count(), 0);
}

#[tokio::test]
async fn exchange_type_conflict_surfaces_and_next_publish_recovers() {
    let broker = MemoryBroker::new();
    let cfg = fast_config();
    let publisher = publisher(&broker, &cfg);

    publisher
        .publish_with_kind("ex", "k", &1, eventvisor::ExchangeKind::Direct)
        .await
        .unwrap();
    let err = publisher.publish("ex", "k", &2).await.unwrap_err();
    assert_eq!(err.as_label(), "declare_failed");

    // The broker closed the channel; the publisher reconnects on the next call.
    publisher
        .publish_with_kind("ex", "k", &3, eventvisor::ExchangeKind::Direct)
        .await
        .unwrap();
    assert_eq!(broker.connect_count(), 2);
}
