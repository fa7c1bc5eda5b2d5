//! # LogForwarder: republishes log records on the event bus.
//!
//! ```text
//! info!/warn!/error! ──► ForwardLayer::on_event ──► try_send ──► [bounded queue]
//!                         (never blocks, drops when full         │
//!                          or when not started)                  ▼
//!                                               drain task: publisher.publish(
//!                                                 log_exchange,
//!                                                 "<service>.<LEVEL>",
//!                                                 {name, levelname, created, message})
//!                                                   │ err: keep record, sleep(log_retry), retry
//! ```
//!
//! ## Rules
//! - Records are published in the order they were enqueued, also across outages.
//! - A failed record is retried until it succeeds or the forwarder stops.
//! - Records from this module are never captured.

use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber, debug};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::config::Config;
use crate::core::Publisher;
use crate::features::Lifecycle;

const OWN_TARGET: &str = module_path!();

/// One forwarded log line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Logger name (the `tracing` target).
    pub name: String,
    /// Level name, e.g. `INFO`.
    pub levelname: String,
    /// Unix timestamp in seconds.
    pub created: f64,
    /// Formatted message.
    pub message: String,
}

impl LogRecord {
    /// Record stamped with the current time.
    pub fn new(name: impl Into<String>, level: Level, message: impl Into<String>) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            name: name.into(),
            levelname: level.as_str().to_string(),
            created,
            message: message.into(),
        }
    }
}

type Slot = Arc<RwLock<Option<mpsc::Sender<LogRecord>>>>;

fn try_emit(slot: &Slot, record: LogRecord) {
    let guard = slot.read().unwrap_or_else(PoisonError::into_inner);
    if let Some(tx) = guard.as_ref() {
        let _ = tx.try_send(record);
    }
}

struct Running {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Background drain of forwarded log records.
pub struct LogForwarder {
    service_name: String,
    exchange: String,
    capacity: usize,
    retry: Duration,
    publisher: Arc<Publisher>,
    slot: Slot,
    running: Mutex<Option<Running>>,
}

impl LogForwarder {
    /// Creates a stopped forwarder publishing through `publisher`.
    pub fn new(cfg: &Config, publisher: Arc<Publisher>) -> Self {
        Self {
            service_name: cfg.service_name.clone(),
            exchange: cfg.log_exchange.clone(),
            capacity: cfg.log_queue_capacity_clamped(),
            retry: cfg.log_retry,
            publisher,
            slot: Arc::new(RwLock::new(None)),
            running: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `tracing` layer feeding this forwarder.
    ///
    /// The layer may be installed before startup; records are dropped until then.
    pub fn layer(&self) -> ForwardLayer {
        ForwardLayer {
            slot: Arc::clone(&self.slot),
        }
    }

    /// Enqueues a record without blocking. Dropped if the queue is full or the
    /// forwarder is not running.
    pub fn emit(&self, record: LogRecord) {
        try_emit(&self.slot, record);
    }

    /// Opens the queue and spawns the drain task.
    ///
    /// No-op outside a tokio runtime or when already running.
    pub fn startup(&self) {
        let mut running = self.lock();
        if running.is_some() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!("no runtime, log forwarder not started");
            return;
        };

        let (tx, rx) = mpsc::channel(self.capacity);
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(tx);

        let token = CancellationToken::new();
        let drain = Drain {
            service_name: self.service_name.clone(),
            exchange: self.exchange.clone(),
            retry: self.retry,
            publisher: Arc::clone(&self.publisher),
        };
        let task = runtime.spawn(drain.run(rx, token.clone()));
        *running = Some(Running { token, task });
    }

    /// Closes the queue, cancels the drain task and waits for it.
    ///
    /// Records still queued are discarded.
    pub async fn shutdown(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
        let running = self.lock().take();
        if let Some(Running { token, task }) = running {
            token.cancel();
            let _ = task.await;
        }
    }

    /// True while the drain task is alive.
    pub fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(|r| !r.task.is_finished())
    }
}

#[async_trait]
impl Lifecycle for LogForwarder {
    fn name(&self) -> &str {
        "log-forwarder"
    }

    async fn startup(&self) {
        LogForwarder::startup(self);
    }

    async fn shutdown(&self) {
        LogForwarder::shutdown(self).await;
    }
}

struct Drain {
    service_name: String,
    exchange: String,
    retry: Duration,
    publisher: Arc<Publisher>,
}

impl Drain {
    async fn run(self, mut rx: mpsc::Receiver<LogRecord>, token: CancellationToken) {
        let mut held: Option<LogRecord> = None;

        loop {
            let record = match held.take() {
                Some(record) => record,
                None => select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(record) => record,
                        None => break,
                    },
                },
            };

            let routing = format!("{}.{}", self.service_name, record.levelname);
            let res = select! {
                biased;
                _ = token.cancelled() => break,
                res = self.publisher.publish(&self.exchange, &routing, &record) => res,
            };
            if let Err(e) = res {
                debug!(label = e.as_label(), "log publish failed, retrying: {e}");
                held = Some(record);
                select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = time::sleep(self.retry) => {}
                }
            }
        }
    }
}

/// `tracing` layer capturing `INFO` and above into a [`LogForwarder`].
#[derive(Clone)]
pub struct ForwardLayer {
    slot: Slot,
}

impl<S: Subscriber> Layer<S> for ForwardLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::INFO || meta.target().starts_with(OWN_TARGET) {
            return;
        }
        if self
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
        {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        try_emit(
            &self.slot,
            LogRecord::new(meta.target(), *meta.level(), visitor.finish()),
        );
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={:?}", field.name(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Bus;
    use crate::session::MemoryBroker;
    use tracing_subscriber::layer::SubscriberExt;

    fn forwarder(broker: &MemoryBroker, capacity: usize) -> LogForwarder {
        let cfg = Config::new("sparkey", "localhost").with_log_forwarding(
            "logs",
            capacity,
            Duration::from_millis(10),
        );
        let publisher = Arc::new(Publisher::new(&cfg, Arc::new(broker.connector()), Bus::new(16)));
        LogForwarder::new(&cfg, publisher)
    }

    #[test]
    fn emit_before_startup_is_dropped() {
        let broker = MemoryBroker::new();
        let fwd = forwarder(&broker, 4);
        fwd.emit(LogRecord::new("x", Level::INFO, "lost"));
        assert!(!fwd.is_running());
    }

    #[tokio::test]
    async fn layer_captures_info_and_above() {
        let broker = MemoryBroker::new();
        let fwd = forwarder(&broker, 8);
        // Drain is never started; inspect the queue directly.
        let (tx, mut rx) = mpsc::channel(8);
        *fwd.slot.write().unwrap() = Some(tx);

        let subscriber = tracing_subscriber::registry().with(fwd.layer());
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(target: "sparkey", "too verbose");
            tracing::info!(target: "sparkey", temp = 21, "hello");
            tracing::error!("own");
            tracing::warn!(target: "sparkey::io", "careful");
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, "sparkey");
        assert_eq!(first.levelname, "INFO");
        assert_eq!(first.message, "hello temp=21");
        assert_eq!(rx.recv().await.unwrap().message, "careful");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn record_serializes_with_the_wire_field_names() {
        let record = LogRecord {
            name: "svc".into(),
            levelname: "WARN".into(),
            created: 1.5,
            message: "m".into(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"name": "svc", "levelname": "WARN", "created": 1.5, "message": "m"})
        );
    }
}
