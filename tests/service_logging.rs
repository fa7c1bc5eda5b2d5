mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use eventvisor::{BrokerOp, Features, LogRecord, MemoryBroker, service};

// Installs the global subscriber, so it stays the only test in this binary.
#[tokio::test]
async fn setup_with_logging_forwards_records_to_the_bus() {
    let broker = MemoryBroker::new();
    let cfg = fast_config();
    let mut features = Features::new();
    service::setup_with_logging(&mut features, &cfg, Arc::new(broker.connector()), "info")
        .unwrap();
    features.startup_all().await;

    tracing::error!(target: "sparkey::io", "sensor offline");

    let record = tokio::time::timeout(WAIT, async {
        loop {
            let found = broker.journal().into_iter().find_map(|op| match op {
                BrokerOp::Publish {
                    exchange,
                    routing,
                    body,
                    ..
                } if exchange == "logs" && routing == "svc.ERROR" => {
                    Some(serde_json::from_slice::<LogRecord>(&body).unwrap())
                }
                _ => None,
            });
            if let Some(record) = found {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("log record was not forwarded");
    assert_eq!(record.name, "sparkey::io");
    assert_eq!(record.message, "sensor offline");

    // A second global subscriber is refused; the components still register.
    let mut second = Features::new();
    let err = service::setup_with_logging(&mut second, &cfg, Arc::new(broker.connector()), "info")
        .unwrap_err();
    assert_eq!(err.as_label(), "logging_init_failed");
    assert!(service::get_forwarder(&second).is_ok());

    features.shutdown_all().await;
}
