//! # Subscriptions: exchange and routing key plus a swappable handler.
//!
//! A [`Subscription`] is created by [`Listener::subscribe`](crate::Listener::subscribe)
//! and owned by the listener from then on. Callers keep an `Arc` handle and may
//! swap the handler at any time with [`Subscription::set_handler`]; the relay
//! path reads the handler per message, never a snapshot taken at subscribe time.
//!
//! ## Remote declaration
//! ```text
//! declare_on_remote(session)
//!   ├─► exchange_declare(exchange, kind, auto_delete)
//!   ├─► queue_declare("", exclusive)   → broker-named queue
//!   ├─► queue_bind(queue, exchange, routing)
//!   └─► consume(queue)                 → every delivery → relay()
//! ```
//!
//! ## Relay
//! `relay` decodes the body as JSON and calls the current handler. Decode errors,
//! handler errors and handler panics are logged and swallowed.

mod handler;

pub use handler::{Handler, HandlerFn, HandlerRef, LogHandler};

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures::FutureExt;
use serde_json::Value;
use tracing::{error, info};

use crate::error::{EventError, RelayError};
use crate::routing::ExchangeKind;
use crate::session::Session;

/// Request for a new subscription.
///
/// ```rust
/// use eventvisor::{ExchangeKind, SubscriptionSpec};
///
/// let spec = SubscriptionSpec::new("brewblox", "controller.#").with_kind(ExchangeKind::Topic);
/// assert_eq!(spec.routing(), "controller.#");
/// ```
#[derive(Clone)]
pub struct SubscriptionSpec {
    exchange: String,
    routing: String,
    kind: ExchangeKind,
    handler: Option<HandlerRef>,
}

impl SubscriptionSpec {
    /// Topic subscription on `exchange` with the default logging handler.
    pub fn new(exchange: impl Into<String>, routing: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            routing: routing.into(),
            kind: ExchangeKind::Topic,
            handler: None,
        }
    }

    /// Exchange type used if the exchange does not exist yet.
    pub fn with_kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Message handler.
    pub fn with_handler(mut self, handler: HandlerRef) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Target exchange.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Binding pattern.
    pub fn routing(&self) -> &str {
        &self.routing
    }
}

/// An accepted subscription.
pub struct Subscription {
    exchange: String,
    routing: String,
    kind: ExchangeKind,
    handler: RwLock<HandlerRef>,
}

impl Subscription {
    pub(crate) fn new(spec: SubscriptionSpec) -> Arc<Self> {
        Arc::new(Self {
            exchange: spec.exchange,
            routing: spec.routing,
            kind: spec.kind,
            handler: RwLock::new(spec.handler.unwrap_or_else(|| Arc::new(LogHandler))),
        })
    }

    /// Exchange name.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Binding pattern.
    pub fn routing(&self) -> &str {
        &self.routing
    }

    /// Exchange type.
    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    /// Current handler.
    pub fn handler(&self) -> HandlerRef {
        self.handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the handler; takes effect for the next delivered message.
    pub fn set_handler(&self, handler: HandlerRef) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    /// Declares exchange, exclusive queue, binding and consumer on `session`.
    pub async fn declare_on_remote(
        self: &Arc<Self>,
        session: &mut dyn Session,
    ) -> Result<(), EventError> {
        info!(subscription = %self, "declaring event bus subscription");

        session.declare_exchange(&self.exchange, self.kind).await?;
        let queue = session.declare_exclusive_queue().await?;
        session
            .bind_queue(&queue, &self.exchange, &self.routing)
            .await?;
        session.consume(&queue, Arc::clone(self)).await
    }

    /// Relays one delivery to the current handler. Never fails.
    pub async fn relay(self: &Arc<Self>, routing_key: &str, body: &[u8]) {
        if let Err(e) = self.try_relay(routing_key, body).await {
            error!(
                subscription = %self,
                key = routing_key,
                label = e.as_label(),
                "exception relaying message: {e}"
            );
        }
    }

    async fn try_relay(self: &Arc<Self>, routing_key: &str, body: &[u8]) -> Result<(), RelayError> {
        let message: Value = serde_json::from_slice(body)?;
        let handler = self.handler();
        let fut = handler.on_message(Arc::clone(self), routing_key.to_string(), message);

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RelayError::Handler(e)),
            Err(panic) => Err(RelayError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} @ {}>", self.routing, self.exchange)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("exchange", &self.exchange)
            .field("routing", &self.routing)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>) -> HandlerRef {
        HandlerFn::arc(move |_sub: Arc<Subscription>, _key: String, _msg: Value| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        })
    }

    #[test]
    fn display_shows_routing_and_exchange() {
        let sub = Subscription::new(SubscriptionSpec::new("brewblox", "controller.*"));
        assert_eq!(sub.to_string(), "<controller.* @ brewblox>");
        assert_eq!(sub.kind(), ExchangeKind::Topic);
    }

    #[tokio::test]
    async fn relay_reads_handler_at_dispatch_time() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let sub = Subscription::new(
            SubscriptionSpec::new("ex", "a.b").with_handler(counting(Arc::clone(&first))),
        );

        sub.relay("a.b", br#"{"a": 1}"#).await;
        sub.set_handler(counting(Arc::clone(&second)));
        sub.relay("a.b", br#"{"a": 2}"#).await;

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn relay_swallows_decode_errors_and_panics() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in = Arc::clone(&seen);
        let sub = Subscription::new(SubscriptionSpec::new("ex", "#").with_handler(HandlerFn::arc(
            move |_sub: Arc<Subscription>, key: String, _msg: Value| {
                let seen = Arc::clone(&seen_in);
                async move {
                    if key == "boom" {
                        panic!("handler exploded");
                    }
                    if key == "fail" {
                        return Err::<(), HandlerError>("nope".into());
                    }
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )));

        sub.relay("x", b"not json").await;
        sub.relay("boom", b"1").await;
        sub.relay("fail", b"1").await;
        sub.relay("ok", b"\"text\"").await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn try_relay_reports_the_failure_kind() {
        let sub = Subscription::new(SubscriptionSpec::new("ex", "#"));
        let err = sub.try_relay("k", b"{oops").await.unwrap_err();
        assert_eq!(err.as_label(), "relay_decode");
        assert!(sub.try_relay("k", b"[1, 2]").await.is_ok());
    }
}
