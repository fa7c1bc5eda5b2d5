//! # Connection sessions.
//!
//! A [`Session`] is one physical connection plus one channel to the broker.
//! Each [`Listener`](crate::Listener) and [`Publisher`](crate::Publisher) owns
//! its own session; sessions are never shared.
//!
//! A [`Connector`] opens sessions for one broker address. Two transports ship
//! with the crate:
//! - [`AmqpConnector`]: AMQP 0-9-1 over `lapin`;
//! - [`MemoryBroker`]: an in-process broker with the same exchange/queue
//!   semantics, used for embedded setups and tests.
//!
//! ## Contract
//! - [`Session::ensure_open`] fails with [`EventError::ConnectionBroken`] once
//!   the connection or channel is unusable; callers treat this exactly like a
//!   failed connect.
//! - [`Session::close`] is best-effort: it closes channel and transport and
//!   swallows every error.
//! - Exchanges are declared auto-delete; queues are exclusive and broker-named.

mod amqp;
mod memory;

pub use amqp::{AmqpConnector, AmqpSession};
pub use memory::{BrokerOp, JOURNAL_CAPACITY, MemoryBroker, MemoryConnector, MemorySession};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EventError;
use crate::routing::ExchangeKind;
use crate::subscription::Subscription;

/// Shared handle to a connector.
pub type ConnectorRef = Arc<dyn Connector>;

/// Opens sessions to one broker.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Broker address, for logs.
    fn address(&self) -> String;

    /// Opens a connection and a channel.
    async fn connect(&self) -> Result<Box<dyn Session>, EventError>;
}

/// One connection + channel, exclusively owned.
#[async_trait]
pub trait Session: Send + 'static {
    /// Fails if the connection or channel is no longer usable.
    async fn ensure_open(&mut self) -> Result<(), EventError>;

    /// Declares an auto-delete exchange of the given kind.
    async fn declare_exchange(&mut self, name: &str, kind: ExchangeKind) -> Result<(), EventError>;

    /// Declares an exclusive, broker-named queue and returns its name.
    async fn declare_exclusive_queue(&mut self) -> Result<String, EventError>;

    /// Binds `queue` to `exchange` with a routing pattern.
    async fn bind_queue(&mut self, queue: &str, exchange: &str, routing: &str)
    -> Result<(), EventError>;

    /// Starts consuming `queue`; each delivery is relayed to `subscription`.
    async fn consume(
        &mut self,
        queue: &str,
        subscription: Arc<Subscription>,
    ) -> Result<(), EventError>;

    /// Publishes `payload` without waiting for a broker confirmation.
    async fn publish(
        &mut self,
        exchange: &str,
        routing: &str,
        payload: Vec<u8>,
    ) -> Result<(), EventError>;

    /// Closes channel and transport. Errors are swallowed.
    async fn close(&mut self);
}
