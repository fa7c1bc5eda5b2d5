//! # Example: publish/subscribe across a broker restart
//!
//! Runs against the in-process broker by default. Set `EVENTBUS_HOST` to use a
//! real AMQP broker instead.
//!
//! ```text
//! cargo run --example pubsub
//! EVENTBUS_HOST=localhost cargo run --example pubsub
//! ```

use std::sync::Arc;
use std::time::Duration;

use eventvisor::{
    Config, ConnectorRef, EventKind, Features, HandlerError, HandlerFn, MemoryBroker,
    Subscription, SubscriptionSpec, service,
};
use serde_json::{Value, json};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let host = std::env::var("EVENTBUS_HOST").ok();
    let cfg = Config::new("pubsub-demo", host.clone().unwrap_or_else(|| "memory".into()));

    let broker = MemoryBroker::new();
    let connector: ConnectorRef = match host {
        Some(_) => Arc::new(eventvisor::AmqpConnector::new(&cfg)),
        None => Arc::new(broker.connector()),
    };

    let mut features = Features::new();
    service::setup_with_logging(&mut features, &cfg, connector, "info")?;

    let listener = service::get_listener(&features)?;
    let publisher = service::get_publisher(&features)?;

    listener.subscribe_spec(SubscriptionSpec::new("demo", "sensor.*").with_handler(HandlerFn::arc(
        |sub: Arc<Subscription>, key: String, msg: Value| async move {
            println!("[{sub}] {key} = {msg}");
            Ok::<(), HandlerError>(())
        },
    )));
    // Log records come back through the bus as well.
    listener.subscribe(cfg.log_exchange.clone(), "pubsub-demo.#");

    let mut events = listener.bus().subscribe();
    features.startup_all().await;

    for i in 0..6 {
        if i == 3 && std::env::var("EVENTBUS_HOST").is_err() {
            println!("-- restarting broker --");
            broker.restart();
            let mut lost = false;
            while let Ok(ev) = events.recv().await {
                match ev.kind {
                    EventKind::ConnectionLost => lost = true,
                    EventKind::Connected if lost => break,
                    _ => {}
                }
            }
        }
        if let Err(e) = publisher
            .publish("demo", "sensor.temp", &json!({"value": 20 + i}))
            .await
        {
            tracing::warn!("publish failed: {e}");
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    features.shutdown_all().await;
    Ok(())
}
