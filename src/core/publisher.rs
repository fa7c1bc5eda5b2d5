//! # Publisher: lazily connected, single-retry message sender.
//!
//! ```text
//! publish(exchange, routing, message)
//!   ├─► serde_json::to_vec(message)
//!   ├─► lock session slot
//!   ├─► ensure_session() ── err ──► PublisherRetry ──► ensure_session() ── err ──► Err
//!   │        │ cached session open? keep : close + connect
//!   ├─► declare_exchange(exchange, kind)
//!   └─► publish(exchange, routing, body)       (no confirmation awaited)
//! ```
//!
//! ## Rules
//! - Runs inline in the caller; there is no background task.
//! - At most one session is cached; calls are serialized on it.
//! - Only the ensure step is retried, exactly once. Declare and publish
//!   errors go straight to the caller.
//! - A connectivity error during declare/publish discards the cached session,
//!   so the next call reconnects.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time;
use tracing::debug;

use crate::config::Config;
use crate::error::EventError;
use crate::events::{Bus, Event, EventKind};
use crate::features::Lifecycle;
use crate::routing::ExchangeKind;
use crate::session::{ConnectorRef, Session};

/// Sends JSON messages to the broker.
pub struct Publisher {
    name: Arc<str>,
    connector: ConnectorRef,
    open_check_timeout: Duration,
    session: Mutex<Option<Box<dyn Session>>>,
    bus: Bus,
}

impl Publisher {
    /// Creates a publisher; no connection is made until the first publish.
    pub fn new(cfg: &Config, connector: ConnectorRef, bus: Bus) -> Self {
        Self {
            name: format!("<Publisher for \"{}\">", connector.address()).into(),
            connector,
            open_check_timeout: cfg.open_check_timeout,
            session: Mutex::new(None),
            bus,
        }
    }

    /// Publishes `message` as JSON to a topic exchange.
    ///
    /// Strings are sent as JSON string literals.
    pub async fn publish<T>(&self, exchange: &str, routing: &str, message: &T) -> Result<(), EventError>
    where
        T: Serialize + ?Sized,
    {
        self.publish_with_kind(exchange, routing, message, ExchangeKind::Topic)
            .await
    }

    /// Publishes `message` as JSON, declaring `exchange` as `kind` if needed.
    pub async fn publish_with_kind<T>(
        &self,
        exchange: &str,
        routing: &str,
        message: &T,
        kind: ExchangeKind,
    ) -> Result<(), EventError>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(message)?;
        let mut slot = self.session.lock().await;

        if let Err(e) = self.ensure_session(&mut slot).await {
            debug!(publisher = %self.name, label = e.as_label(), "retrying after: {e}");
            self.bus.publish(
                Event::new(EventKind::PublisherRetry)
                    .with_component(Arc::clone(&self.name))
                    .with_error(e.to_string()),
            );
            self.ensure_session(&mut slot).await?;
        }
        let Some(session) = slot.as_mut() else {
            return Err(EventError::broken("no session after connect"));
        };

        let res = match session.declare_exchange(exchange, kind).await {
            Ok(()) => session.publish(exchange, routing, body).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &res {
            debug!(publisher = %self.name, exchange, routing, label = e.as_label(), "publish failed: {e}");
            if e.is_connectivity() {
                self.discard(&mut slot).await;
            }
        }
        res
    }

    /// Makes sure `slot` holds an open session.
    async fn ensure_session(&self, slot: &mut Option<Box<dyn Session>>) -> Result<(), EventError> {
        if let Some(session) = slot.as_mut() {
            match time::timeout(self.open_check_timeout, session.ensure_open()).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => debug!(publisher = %self.name, "cached session unusable: {e}"),
                Err(_elapsed) => debug!(publisher = %self.name, "cached session open check timed out"),
            }
            self.discard(slot).await;
        }

        let session = self.connector.connect().await?;
        *slot = Some(session);
        self.bus.publish(
            Event::new(EventKind::PublisherConnected).with_component(Arc::clone(&self.name)),
        );
        Ok(())
    }

    async fn discard(&self, slot: &mut Option<Box<dyn Session>>) {
        if let Some(mut session) = slot.take() {
            let _ = time::timeout(self.open_check_timeout, session.close()).await;
        }
    }

    /// True if a session is currently cached.
    pub async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Closes the cached session, if any. A later publish reconnects.
    pub async fn shutdown(&self) {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            self.discard(&mut slot).await;
            self.bus.publish(
                Event::new(EventKind::PublisherClosed).with_component(Arc::clone(&self.name)),
            );
        }
    }

    /// Lifecycle event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }
}

impl fmt::Display for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[async_trait]
impl Lifecycle for Publisher {
    fn name(&self) -> &str {
        "publisher"
    }

    async fn shutdown(&self) {
        Publisher::shutdown(self).await;
    }
}
