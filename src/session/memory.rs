//! # In-process broker.
//!
//! [`MemoryBroker`] implements exchange/queue semantics in memory: auto-delete
//! exchanges of any [`ExchangeKind`], exclusive broker-named queues that vanish
//! with their session, topic routing with `*`/`#`, and at-most-once delivery.
//! An exchange is deleted once its last binding goes away; an exchange that
//! was never bound stays until the broker stops.
//!
//! It is used when services run embedded without a broker, and by tests that
//! need to observe what a client did to the broker:
//! - the most recent operations are kept in a bounded journal ([`BrokerOp`],
//!   [`JOURNAL_CAPACITY`] entries by default, oldest dropped first);
//! - the broker can be stopped, started and restarted (open sessions break);
//! - connects can be refused and open checks can be made to hang.
//!
//! ```text
//! MemoryBroker ─┬─ exchanges: name → kind
//!               ├─ queues:    name → { owner session, bindings, channel }
//!               ├─ live:      open session ids
//!               └─ journal:   VecDeque<BrokerOp> (bounded)
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Connector, Session};
use crate::error::EventError;
use crate::routing::{self, ExchangeKind};
use crate::subscription::Subscription;

/// Default number of journal entries a [`MemoryBroker`] keeps.
pub const JOURNAL_CAPACITY: usize = 4096;

/// One operation performed against the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerOp {
    /// Session opened.
    Connect {
        /// Session id.
        session: u64,
    },
    /// Exchange declared.
    DeclareExchange {
        /// Session id.
        session: u64,
        /// Exchange name.
        exchange: String,
        /// Exchange kind.
        kind: ExchangeKind,
    },
    /// Exclusive queue declared.
    DeclareQueue {
        /// Session id.
        session: u64,
        /// Broker-assigned queue name.
        queue: String,
    },
    /// Queue bound to an exchange.
    Bind {
        /// Session id.
        session: u64,
        /// Queue name.
        queue: String,
        /// Exchange name.
        exchange: String,
        /// Binding pattern.
        routing: String,
    },
    /// Consumer registered.
    Consume {
        /// Session id.
        session: u64,
        /// Queue name.
        queue: String,
    },
    /// Message published.
    Publish {
        /// Session id.
        session: u64,
        /// Exchange name.
        exchange: String,
        /// Routing key.
        routing: String,
        /// Message body.
        body: Vec<u8>,
    },
    /// Session closed by its owner.
    Close {
        /// Session id.
        session: u64,
    },
}

struct Delivery {
    routing_key: String,
    body: Vec<u8>,
}

struct MemoryQueue {
    owner: u64,
    bindings: Vec<(String, String)>,
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Option<mpsc::UnboundedReceiver<Delivery>>,
}

struct BrokerState {
    online: bool,
    epoch: u64,
    next_session: u64,
    next_queue: u64,
    refuse_connects: usize,
    hang_open_checks: bool,
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, MemoryQueue>,
    live: HashSet<u64>,
    connects: usize,
    journal: VecDeque<BrokerOp>,
    journal_capacity: usize,
}

impl BrokerState {
    fn route(&self, exchange: &str, routing_key: &str, body: &[u8]) {
        let Some(kind) = self.exchanges.get(exchange).copied() else {
            return;
        };
        for queue in self.queues.values() {
            let hit = queue
                .bindings
                .iter()
                .any(|(ex, pattern)| ex == exchange && routing::matches(kind, pattern, routing_key));
            if hit {
                let _ = queue.tx.send(Delivery {
                    routing_key: routing_key.to_string(),
                    body: body.to_vec(),
                });
            }
        }
    }

    fn record(&mut self, op: BrokerOp) {
        if self.journal_capacity == 0 {
            return;
        }
        if self.journal.len() == self.journal_capacity {
            self.journal.pop_front();
        }
        self.journal.push_back(op);
    }

    /// Removes matching queues, then every exchange left without bindings.
    fn remove_queues(&mut self, doomed: impl Fn(&MemoryQueue) -> bool) {
        let mut unbound = HashSet::new();
        self.queues.retain(|_, q| {
            if doomed(q) {
                unbound.extend(q.bindings.iter().map(|(ex, _)| ex.clone()));
                false
            } else {
                true
            }
        });
        for exchange in unbound {
            let still_bound = self
                .queues
                .values()
                .any(|q| q.bindings.iter().any(|(ex, _)| *ex == exchange));
            if !still_bound {
                self.exchanges.remove(&exchange);
            }
        }
    }

    fn drop_session(&mut self, session: u64) {
        self.live.remove(&session);
        self.remove_queues(|q| q.owner == session);
    }

    fn reset(&mut self) {
        self.epoch += 1;
        self.live.clear();
        self.queues.clear();
        self.exchanges.clear();
    }
}

/// In-process broker. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Creates a running broker keeping the last [`JOURNAL_CAPACITY`] operations.
    pub fn new() -> Self {
        Self::with_journal_capacity(JOURNAL_CAPACITY)
    }

    /// Creates a running broker keeping the last `capacity` operations.
    ///
    /// A capacity of 0 disables the journal.
    pub fn with_journal_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                online: true,
                epoch: 0,
                next_session: 1,
                next_queue: 1,
                refuse_connects: 0,
                hang_open_checks: false,
                exchanges: HashMap::new(),
                queues: HashMap::new(),
                live: HashSet::new(),
                connects: 0,
                journal: VecDeque::new(),
                journal_capacity: capacity,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connector for this broker.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    /// Stops the broker: open sessions break, queues and exchanges are gone,
    /// connects fail until [`start`](Self::start).
    pub fn stop(&self) {
        let mut st = self.lock();
        st.online = false;
        st.reset();
    }

    /// Starts a stopped broker.
    pub fn start(&self) {
        self.lock().online = true;
    }

    /// Stop followed by start.
    pub fn restart(&self) {
        self.stop();
        self.start();
    }

    /// Breaks every open session while staying online.
    pub fn drop_connections(&self) {
        let mut st = self.lock();
        st.epoch += 1;
        st.live.clear();
        st.remove_queues(|_| true);
    }

    /// Refuses the next `n` connects even while online.
    pub fn refuse_connects(&self, n: usize) {
        self.lock().refuse_connects = n;
    }

    /// When set, open checks never answer.
    pub fn hang_open_checks(&self, hang: bool) {
        self.lock().hang_open_checks = hang;
    }

    /// True while the broker accepts connections.
    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// Number of sessions currently open.
    pub fn live_sessions(&self) -> usize {
        self.lock().live.len()
    }

    /// Copy of the operation journal, oldest first.
    pub fn journal(&self) -> Vec<BrokerOp> {
        self.lock().journal.iter().cloned().collect()
    }

    /// Empties the operation journal.
    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    /// Binding patterns in the order they were bound, across all sessions
    /// still in the journal.
    pub fn bound_patterns(&self) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter_map(|op| match op {
                BrokerOp::Bind { routing, .. } => Some(routing.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of connects that succeeded so far.
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    /// True while an exchange called `name` exists.
    pub fn has_exchange(&self, name: &str) -> bool {
        self.lock().exchanges.contains_key(name)
    }

    /// Routes a raw body through `exchange`, bypassing any session.
    pub fn inject(&self, exchange: &str, routing_key: &str, body: &[u8]) {
        self.lock().route(exchange, routing_key, body);
    }
}

/// Opens [`MemorySession`]s on a [`MemoryBroker`].
#[derive(Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

#[async_trait]
impl Connector for MemoryConnector {
    fn address(&self) -> String {
        "memory".to_string()
    }

    async fn connect(&self) -> Result<Box<dyn Session>, EventError> {
        let mut st = self.broker.lock();
        if !st.online {
            return Err(EventError::Connect {
                address: self.address(),
                reason: "connection refused".to_string(),
            });
        }
        if st.refuse_connects > 0 {
            st.refuse_connects -= 1;
            return Err(EventError::Connect {
                address: self.address(),
                reason: "connection refused".to_string(),
            });
        }

        let id = st.next_session;
        st.next_session += 1;
        st.live.insert(id);
        st.connects += 1;
        st.record(BrokerOp::Connect { session: id });

        Ok(Box::new(MemorySession {
            broker: self.broker.clone(),
            id,
            epoch: st.epoch,
            closed: false,
            consumers: Vec::new(),
        }))
    }
}

/// Session on a [`MemoryBroker`].
pub struct MemorySession {
    broker: MemoryBroker,
    id: u64,
    epoch: u64,
    closed: bool,
    consumers: Vec<JoinHandle<()>>,
}

impl MemorySession {
    /// Session id as recorded in the journal.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn usable(&self, st: &BrokerState) -> Result<(), EventError> {
        if self.closed {
            return Err(EventError::broken("channel closed"));
        }
        if !st.online || st.epoch != self.epoch {
            return Err(EventError::broken("connection reset by broker"));
        }
        Ok(())
    }

    fn release(&mut self) {
        for handle in self.consumers.drain(..) {
            handle.abort();
        }
        let mut st = self.broker.lock();
        if st.epoch == self.epoch {
            st.drop_session(self.id);
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn ensure_open(&mut self) -> Result<(), EventError> {
        let hang = {
            let st = self.broker.lock();
            self.usable(&st)?;
            st.hang_open_checks
        };
        if hang {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn declare_exchange(&mut self, name: &str, kind: ExchangeKind) -> Result<(), EventError> {
        let mut st = self.broker.lock();
        self.usable(&st)?;
        st.record(BrokerOp::DeclareExchange {
            session: self.id,
            exchange: name.to_string(),
            kind,
        });
        match st.exchanges.get(name) {
            Some(existing) if *existing != kind => {
                // Channel-level error: the broker closes the channel.
                self.closed = true;
                Err(EventError::declare(
                    format!("exchange \"{name}\" ({kind})"),
                    format!("inequivalent exchange type: existing is {existing}"),
                ))
            }
            Some(_) => Ok(()),
            None => {
                st.exchanges.insert(name.to_string(), kind);
                Ok(())
            }
        }
    }

    async fn declare_exclusive_queue(&mut self) -> Result<String, EventError> {
        let mut st = self.broker.lock();
        self.usable(&st)?;
        let name = format!("amq.gen-{}", st.next_queue);
        st.next_queue += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        st.queues.insert(
            name.clone(),
            MemoryQueue {
                owner: self.id,
                bindings: Vec::new(),
                tx,
                rx: Some(rx),
            },
        );
        st.record(BrokerOp::DeclareQueue {
            session: self.id,
            queue: name.clone(),
        });
        Ok(name)
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing: &str,
    ) -> Result<(), EventError> {
        let mut st = self.broker.lock();
        self.usable(&st)?;
        if !st.exchanges.contains_key(exchange) {
            self.closed = true;
            return Err(EventError::declare(
                format!("binding {queue} -> {exchange}"),
                "no such exchange",
            ));
        }
        let Some(q) = st.queues.get_mut(queue) else {
            self.closed = true;
            return Err(EventError::declare(format!("binding {queue} -> {exchange}"), "no such queue"));
        };
        q.bindings.push((exchange.to_string(), routing.to_string()));
        st.record(BrokerOp::Bind {
            session: self.id,
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing: routing.to_string(),
        });
        Ok(())
    }

    async fn consume(
        &mut self,
        queue: &str,
        subscription: Arc<Subscription>,
    ) -> Result<(), EventError> {
        let mut rx = {
            let mut st = self.broker.lock();
            self.usable(&st)?;
            let rx = match st.queues.get_mut(queue) {
                Some(q) if q.owner == self.id => q.rx.take(),
                _ => None,
            };
            let Some(rx) = rx else {
                return Err(EventError::declare(format!("consumer on {queue}"), "queue not available"));
            };
            st.record(BrokerOp::Consume {
                session: self.id,
                queue: queue.to_string(),
            });
            rx
        };

        self.consumers.push(tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                subscription
                    .relay(&delivery.routing_key, &delivery.body)
                    .await;
            }
        }));
        Ok(())
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing: &str,
        payload: Vec<u8>,
    ) -> Result<(), EventError> {
        let mut st = self.broker.lock();
        self.usable(&st)?;
        if !st.exchanges.contains_key(exchange) {
            self.closed = true;
            return Err(EventError::Publish {
                exchange: exchange.to_string(),
                routing: routing.to_string(),
                reason: "no such exchange".to_string(),
            });
        }
        st.route(exchange, routing, &payload);
        st.record(BrokerOp::Publish {
            session: self.id,
            exchange: exchange.to_string(),
            routing: routing.to_string(),
            body: payload,
        });
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.broker.lock().record(BrokerOp::Close { session: self.id });
        }
        self.release();
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn restart_breaks_open_sessions() {
        let broker = MemoryBroker::new();
        let mut session = broker.connector().connect().await.unwrap();
        assert!(session.ensure_open().await.is_ok());
        assert_eq!(broker.live_sessions(), 1);

        broker.restart();
        let err = session.ensure_open().await.unwrap_err();
        assert_eq!(err.as_label(), "connection_broken");
        assert_eq!(broker.live_sessions(), 0);
    }

    #[tokio::test]
    async fn stopped_broker_refuses_connects() {
        let broker = MemoryBroker::new();
        broker.stop();
        assert!(broker.connector().connect().await.is_err());

        broker.start();
        broker.refuse_connects(1);
        assert!(broker.connector().connect().await.is_err());
        assert!(broker.connector().connect().await.is_ok());
    }

    #[tokio::test]
    async fn conflicting_exchange_type_closes_channel() {
        let broker = MemoryBroker::new();
        let mut session = broker.connector().connect().await.unwrap();
        session.declare_exchange("ex", ExchangeKind::Topic).await.unwrap();

        let err = session
            .declare_exchange("ex", ExchangeKind::Fanout)
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "declare_failed");
        assert!(session.ensure_open().await.is_err());
    }

    #[tokio::test]
    async fn close_removes_exclusive_queues() {
        let broker = MemoryBroker::new();
        let mut session = broker.connector().connect().await.unwrap();
        session.declare_exchange("ex", ExchangeKind::Topic).await.unwrap();
        let queue = session.declare_exclusive_queue().await.unwrap();
        session.bind_queue(&queue, "ex", "a.*").await.unwrap();
        assert_eq!(broker.bound_patterns(), vec!["a.*".to_string()]);

        session.close().await;
        assert_eq!(broker.live_sessions(), 0);
        assert!(broker.lock().queues.is_empty());
        assert!(matches!(broker.journal().last(), Some(BrokerOp::Close { .. })));
    }

    #[tokio::test]
    async fn exchange_goes_away_with_its_last_binding() {
        let broker = MemoryBroker::new();
        let mut first = broker.connector().connect().await.unwrap();
        let mut second = broker.connector().connect().await.unwrap();
        for session in [&mut first, &mut second] {
            session.declare_exchange("ex", ExchangeKind::Topic).await.unwrap();
            let queue = session.declare_exclusive_queue().await.unwrap();
            session.bind_queue(&queue, "ex", "#").await.unwrap();
        }
        let mut unbound = broker.connector().connect().await.unwrap();
        unbound.declare_exchange("solo", ExchangeKind::Fanout).await.unwrap();

        first.close().await;
        assert!(broker.has_exchange("ex"));
        second.close().await;
        assert!(!broker.has_exchange("ex"));
        assert!(broker.has_exchange("solo"));

        // Redeclaring with another kind no longer conflicts.
        let mut next = broker.connector().connect().await.unwrap();
        next.declare_exchange("ex", ExchangeKind::Direct).await.unwrap();
    }

    #[tokio::test]
    async fn journal_keeps_only_the_latest_operations() {
        let broker = MemoryBroker::with_journal_capacity(8);
        let mut session = broker.connector().connect().await.unwrap();
        session.declare_exchange("ex", ExchangeKind::Topic).await.unwrap();
        for i in 0..100u8 {
            session.publish("ex", "k", vec![i]).await.unwrap();
        }

        let journal = broker.journal();
        assert_eq!(journal.len(), 8);
        assert!(matches!(
            journal.last(),
            Some(BrokerOp::Publish { body, .. }) if body == &vec![99]
        ));
        assert_eq!(broker.connect_count(), 1);

        let silent = MemoryBroker::with_journal_capacity(0);
        let mut session = silent.connector().connect().await.unwrap();
        session.declare_exchange("ex", ExchangeKind::Topic).await.unwrap();
        assert!(silent.journal().is_empty());
        assert_eq!(silent.connect_count(), 1);
    }
}
