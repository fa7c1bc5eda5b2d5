#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use eventvisor::{
    BackoffPolicy, Bus, Config, Event, EventKind, HandlerError, HandlerFn, HandlerRef, Listener,
    MemoryBroker, Publisher, Subscription,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

pub const WAIT: Duration = Duration::from_secs(5);

/// Config with short timings so reconnect scenarios finish quickly.
pub fn fast_config() -> Config {
    Config::new("svc", "localhost")
        .with_reconnect(BackoffPolicy::fixed(Duration::from_millis(20)))
        .with_pending_timeout(Duration::from_millis(50))
        .with_open_check_timeout(Duration::from_millis(200))
        .with_log_forwarding("logs", 16, Duration::from_millis(20))
}

pub fn listener(broker: &MemoryBroker, cfg: &Config) -> Arc<Listener> {
    Arc::new(Listener::new(cfg, Arc::new(broker.connector()), Bus::new(256)))
}

pub fn publisher(broker: &MemoryBroker, cfg: &Config) -> Arc<Publisher> {
    Arc::new(Publisher::new(cfg, Arc::new(broker.connector()), Bus::new(256)))
}

/// Handler forwarding `(routing_key, message)` into a channel.
pub fn collector() -> (HandlerRef, mpsc::UnboundedReceiver<(String, Value)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = HandlerFn::arc(move |_sub: Arc<Subscription>, key: String, msg: Value| {
        let tx = tx.clone();
        async move {
            let _ = tx.send((key, msg));
            Ok::<(), HandlerError>(())
        }
    });
    (handler, rx)
}

/// Waits for the first event matching `pred`.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<Event>,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    let fut = async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("bus closed"),
            }
        }
    };
    tokio::time::timeout(WAIT, fut).await.expect("timed out waiting for event")
}

pub async fn wait_kind(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
    wait_for(rx, |ev| ev.kind == kind).await
}

pub async fn wait_declared(rx: &mut broadcast::Receiver<Event>, display: &str) -> Event {
    wait_for(rx, |ev| {
        ev.kind == EventKind::SubscriptionDeclared && ev.subscription.as_deref() == Some(display)
    })
    .await
}

pub async fn recv(rx: &mut mpsc::UnboundedReceiver<(String, Value)>) -> (String, Value) {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("handler channel closed")
}
