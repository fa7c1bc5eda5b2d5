//! # Listener: subscription intake and background loop ownership.
//!
//! ```text
//! subscribe() ─┬─ NotStarted ─► deferred list ──┐ startup(): moved once, in order
//!              │                                ▼
//!              └─ Started ────────────────► Registry.pending ──► ListenerWorker
//!                                                                (spawned lazily)
//! ```
//!
//! ## Rules
//! - `subscribe` never suspends and is safe before the runtime exists.
//! - The loop is started lazily: only after `startup`, inside a tokio runtime,
//!   when no loop is running and at least one subscription exists.
//! - Every accepted subscription re-triggers the lazy start.
//! - `shutdown` cancels the loop and waits for it to close its session.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::core::registry::Registry;
use crate::core::worker::{ListenerWorker, WorkerParams};
use crate::events::{Bus, Event, EventKind};
use crate::features::Lifecycle;
use crate::session::ConnectorRef;
use crate::subscription::{Subscription, SubscriptionSpec};

enum State {
    NotStarted {
        deferred: Vec<Arc<Subscription>>,
    },
    Started {
        token: CancellationToken,
        task: Option<JoinHandle<()>>,
    },
    Stopped,
}

/// Keeps subscriptions declared on the broker across reconnects.
pub struct Listener {
    name: Arc<str>,
    connector: ConnectorRef,
    params: WorkerParams,
    registry: Arc<Registry>,
    bus: Bus,
    state: Mutex<State>,
}

impl Listener {
    /// Creates a listener that is not started yet.
    pub fn new(cfg: &Config, connector: ConnectorRef, bus: Bus) -> Self {
        Self {
            name: format!("<Listener for \"{}\">", connector.address()).into(),
            connector,
            params: WorkerParams {
                reconnect: cfg.reconnect,
                pending_timeout: cfg.pending_timeout,
                open_check_timeout: cfg.open_check_timeout,
            },
            registry: Registry::new(),
            bus,
            state: Mutex::new(State::NotStarted {
                deferred: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes to `routing` on a topic exchange, logging every message.
    pub fn subscribe(
        &self,
        exchange: impl Into<String>,
        routing: impl Into<String>,
    ) -> Arc<Subscription> {
        self.subscribe_spec(SubscriptionSpec::new(exchange, routing))
    }

    /// Subscribes with an explicit exchange kind and handler.
    ///
    /// The returned handle can be used to swap the handler later.
    pub fn subscribe_spec(&self, spec: SubscriptionSpec) -> Arc<Subscription> {
        let sub = Subscription::new(spec);
        let mut state = self.lock();

        let kind = match &mut *state {
            State::NotStarted { deferred } => {
                deferred.push(Arc::clone(&sub));
                EventKind::SubscriptionDeferred
            }
            State::Started { .. } | State::Stopped => {
                self.registry.push_pending(Arc::clone(&sub));
                EventKind::SubscriptionQueued
            }
        };
        self.bus.publish(
            Event::new(kind)
                .with_component(Arc::clone(&self.name))
                .with_subscription(sub.to_string()),
        );
        self.lazy_listen(&mut state);
        sub
    }

    /// Moves deferred subscriptions into the pending queue and starts the loop
    /// if there is anything to listen for.
    ///
    /// Must be called from within a tokio runtime for the loop to start.
    pub fn startup(&self) {
        let mut state = self.lock();
        let previous = mem::replace(
            &mut *state,
            State::Started {
                token: CancellationToken::new(),
                task: None,
            },
        );
        match previous {
            State::NotStarted { deferred } => self.registry.extend_pending(deferred),
            running @ State::Started { .. } => *state = running,
            State::Stopped => {}
        }
        self.lazy_listen(&mut state);
    }

    /// Cancels the loop and waits until it exited.
    pub async fn shutdown(&self) {
        let previous = mem::replace(&mut *self.lock(), State::Stopped);
        match previous {
            State::NotStarted { deferred } => self.registry.extend_pending(deferred),
            State::Started { token, task } => {
                token.cancel();
                if let Some(task) = task {
                    let _ = task.await;
                }
            }
            State::Stopped => {}
        }
    }

    fn lazy_listen(&self, state: &mut State) {
        let State::Started { token, task } = state else {
            return;
        };
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        if self.registry.is_empty() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!(listener = %self.name, "no runtime, listener loop not started");
            return;
        };

        let worker = ListenerWorker {
            name: Arc::clone(&self.name),
            connector: Arc::clone(&self.connector),
            registry: Arc::clone(&self.registry),
            bus: self.bus.clone(),
            params: self.params.clone(),
        };
        *task = Some(runtime.spawn(worker.run(token.clone())));
    }

    /// Subscriptions waiting to be declared, in queue order.
    pub fn pending(&self) -> Vec<Arc<Subscription>> {
        self.registry.pending()
    }

    /// Declared subscriptions, in insertion order.
    pub fn active(&self) -> Vec<Arc<Subscription>> {
        self.registry.active()
    }

    /// Subscriptions accepted before startup that were not migrated yet.
    pub fn deferred(&self) -> Vec<Arc<Subscription>> {
        match &*self.lock() {
            State::NotStarted { deferred } => deferred.clone(),
            _ => Vec::new(),
        }
    }

    /// True while the background loop is alive.
    pub fn is_running(&self) -> bool {
        matches!(
            &*self.lock(),
            State::Started { task: Some(task), .. } if !task.is_finished()
        )
    }

    /// Lifecycle event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[async_trait]
impl Lifecycle for Listener {
    fn name(&self) -> &str {
        "listener"
    }

    async fn startup(&self) {
        Listener::startup(self);
    }

    async fn shutdown(&self) {
        Listener::shutdown(self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryBroker;

    fn listener(broker: &MemoryBroker) -> Listener {
        let cfg = Config::new("test", "localhost");
        Listener::new(&cfg, Arc::new(broker.connector()), Bus::new(64))
    }

    #[test]
    fn subscribe_without_runtime_is_deferred() {
        let broker = MemoryBroker::new();
        let listener = listener(&broker);
        let sub = listener.subscribe("brewblox", "controller.*");

        assert_eq!(listener.deferred().len(), 1);
        assert!(Arc::ptr_eq(&listener.deferred()[0], &sub));
        assert!(listener.pending().is_empty());
        assert!(!listener.is_running());
    }

    #[tokio::test]
    async fn startup_without_subscriptions_stays_idle() {
        let broker = MemoryBroker::new();
        let listener = listener(&broker);
        listener.startup();

        assert!(!listener.is_running());
        assert_eq!(broker.connect_count(), 0);
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn startup_migrates_deferred_once() {
        let broker = MemoryBroker::new();
        broker.stop();
        let listener = listener(&broker);
        listener.subscribe("ex", "a");
        listener.subscribe("ex", "b");

        listener.startup();
        listener.startup();

        let routings: Vec<_> = listener
            .pending()
            .iter()
            .map(|s| s.routing().to_string())
            .collect();
        assert_eq!(routings, vec!["a", "b"]);
        assert!(listener.deferred().is_empty());
        assert!(listener.is_running());

        listener.shutdown().await;
        assert!(!listener.is_running());
        assert_eq!(listener.pending().len(), 2);
    }
}
