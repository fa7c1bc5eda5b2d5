//! # AMQP 0-9-1 transport over `lapin`.
//!
//! ```text
//! AmqpConnector::connect()
//!   ├─► Connection::connect(uri)
//!   └─► connection.create_channel()
//!          └─► AmqpSession { connection, channel, consumers }
//!
//! consume(queue, sub)
//!   └─► basic_consume(no_ack) ──► spawn ─► while let Some(delivery) ─► sub.relay()
//! ```
//!
//! Consumer tasks belong to the session and are aborted on close.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties,
    options::{
        BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Connector, Session};
use crate::config::Config;
use crate::error::EventError;
use crate::routing::ExchangeKind;
use crate::subscription::Subscription;

/// Opens [`AmqpSession`]s to one broker.
#[derive(Clone, Debug)]
pub struct AmqpConnector {
    uri: String,
    address: String,
}

impl AmqpConnector {
    /// Connector for the broker configured in `cfg`.
    pub fn new(cfg: &Config) -> Self {
        Self {
            uri: cfg.amqp_uri(),
            address: cfg.address(),
        }
    }

    /// Connector for an explicit AMQP URI.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            address: uri.clone(),
            uri,
        }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn connect(&self) -> Result<Box<dyn Session>, EventError> {
        let fail = |e: lapin::Error| EventError::Connect {
            address: self.address.clone(),
            reason: e.to_string(),
        };

        // Drive lapin's I/O on the caller's tokio runtime.
        let properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);
        let connection = Connection::connect(&self.uri, properties)
            .await
            .map_err(fail)?;
        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(200, "channel open failed").await;
                return Err(fail(e));
            }
        };

        debug!(address = %self.address, "amqp session opened");
        Ok(Box::new(AmqpSession {
            connection,
            channel,
            consumers: Vec::new(),
        }))
    }
}

/// One AMQP connection and channel.
pub struct AmqpSession {
    connection: Connection,
    channel: Channel,
    consumers: Vec<JoinHandle<()>>,
}

#[async_trait]
impl Session for AmqpSession {
    async fn ensure_open(&mut self) -> Result<(), EventError> {
        if !self.connection.status().connected() {
            return Err(EventError::broken("connection is closed"));
        }
        if !self.channel.status().connected() {
            return Err(EventError::broken("channel is closed"));
        }
        Ok(())
    }

    async fn declare_exchange(&mut self, name: &str, kind: ExchangeKind) -> Result<(), EventError> {
        let amqp_kind = match kind {
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        };
        let options = ExchangeDeclareOptions {
            auto_delete: true,
            ..ExchangeDeclareOptions::default()
        };
        self.channel
            .exchange_declare(name, amqp_kind, options, FieldTable::default())
            .await
            .map_err(|e| EventError::declare(format!("exchange \"{name}\" ({kind})"), e))
    }

    async fn declare_exclusive_queue(&mut self) -> Result<String, EventError> {
        let options = QueueDeclareOptions {
            exclusive: true,
            ..QueueDeclareOptions::default()
        };
        let queue = self
            .channel
            .queue_declare("", options, FieldTable::default())
            .await
            .map_err(|e| EventError::declare("exclusive queue", e))?;
        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(
        &mut self,
        queue: &str,
        exchange: &str,
        routing: &str,
    ) -> Result<(), EventError> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| EventError::declare(format!("binding {queue} -> {exchange} ({routing})"), e))
    }

    async fn consume(
        &mut self,
        queue: &str,
        subscription: Arc<Subscription>,
    ) -> Result<(), EventError> {
        let options = BasicConsumeOptions {
            no_ack: true,
            ..BasicConsumeOptions::default()
        };
        let mut consumer = self
            .channel
            .basic_consume(queue, "", options, FieldTable::default())
            .await
            .map_err(|e| EventError::declare(format!("consumer on {queue}"), e))?;

        let handle = tokio::spawn(async move {
            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        subscription
                            .relay(delivery.routing_key.as_str(), &delivery.data)
                            .await
                    }
                    Err(e) => {
                        debug!(%subscription, "consumer stopped: {e}");
                        break;
                    }
                }
            }
        });
        self.consumers.push(handle);
        Ok(())
    }

    async fn publish(
        &mut self,
        exchange: &str,
        routing: &str,
        payload: Vec<u8>,
    ) -> Result<(), EventError> {
        let properties = BasicProperties::default().with_content_type("application/json".into());
        // Returned confirm is not awaited: fire-and-forget.
        self.channel
            .basic_publish(
                exchange,
                routing,
                BasicPublishOptions::default(),
                &payload,
                properties,
            )
            .await
            .map(|_confirm| ())
            .map_err(|e| EventError::Publish {
                exchange: exchange.to_string(),
                routing: routing.to_string(),
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) {
        for handle in self.consumers.drain(..) {
            handle.abort();
        }
        if self.channel.status().connected() {
            let _ = self.channel.close(200, "closing").await;
        }
        if self.connection.status().connected() {
            let _ = self.connection.close(200, "closing").await;
        }
        debug!("amqp session closed");
    }
}

impl Drop for AmqpSession {
    fn drop(&mut self) {
        for handle in &self.consumers {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn refused_connect_fails_on_the_current_runtime() {
        let port = {
            let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            socket.local_addr().unwrap().port()
        };
        let connector = AmqpConnector::from_uri(format!("amqp://127.0.0.1:{port}/%2f"));

        let res = tokio::time::timeout(Duration::from_secs(5), connector.connect())
            .await
            .expect("connect did not resolve on a current-thread runtime");
        let err = res.err().expect("nothing listens on the port");
        assert_eq!(err.as_label(), "connect_failed");
    }
}
