mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::*;
use eventvisor::{EventKind, MemoryBroker};
use tracing::{Event as TracingEvent, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Counts `WARN` records emitted by the crate.
#[derive(Clone, Default)]
struct WarnCounter(Arc<AtomicUsize>);

impl WarnCounter {
    fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &TracingEvent<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() == Level::WARN && meta.target().starts_with("eventvisor") {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// Current-thread runtime: the listener task is polled on this thread and
// sees the thread-local subscriber.
#[tokio::test]
async fn connection_failures_warn_once_per_outage() {
    let warns = WarnCounter::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(warns.clone()));

    let broker = MemoryBroker::new();
    broker.stop();
    let cfg = fast_config();
    let listener = listener(&broker, &cfg);
    let mut events = listener.bus().subscribe();

    listener.subscribe("ex", "k");
    listener.startup();
    for _ in 0..5 {
        wait_kind(&mut events, EventKind::ReconnectScheduled).await;
    }
    assert_eq!(warns.get(), 1);

    broker.start();
    wait_declared(&mut events, "<k @ ex>").await;

    broker.stop();
    for _ in 0..3 {
        wait_kind(&mut events, EventKind::ReconnectScheduled).await;
    }
    assert_eq!(warns.get(), 2);

    broker.start();
    wait_kind(&mut events, EventKind::Connected).await;
    listener.shutdown().await;
}
