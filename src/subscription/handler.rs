//! # Message handlers.
//!
//! [`Handler`] is the callback invoked for every message delivered to a
//! [`Subscription`]. [`HandlerFn`] wraps a closure; [`LogHandler`] is the
//! default and only logs what it receives.
//!
//! A handler receives owned values: the subscription handle, the routing key
//! of the message and the decoded JSON payload.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use eventvisor::{HandlerFn, HandlerRef, Subscription};
//! use serde_json::Value;
//!
//! let h: HandlerRef = HandlerFn::arc(|sub: Arc<Subscription>, key: String, msg: Value| async move {
//!     println!("{sub}: {key} = {msg}");
//!     Ok(())
//! });
//! # let _ = h;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::HandlerError;
use crate::subscription::Subscription;

/// Shared handle to a handler.
pub type HandlerRef = Arc<dyn Handler>;

/// Callback for inbound messages.
///
/// Errors and panics are caught by the relay and logged; they never reach the
/// connection loop or other subscriptions.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles one message.
    async fn on_message(
        &self,
        subscription: Arc<Subscription>,
        routing_key: String,
        message: Value,
    ) -> Result<(), HandlerError>;
}

/// Closure-backed handler.
///
/// The closure creates a fresh future per message.
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    /// Wraps a closure.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wraps a closure and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Arc<Subscription>, String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn on_message(
        &self,
        subscription: Arc<Subscription>,
        routing_key: String,
        message: Value,
    ) -> Result<(), HandlerError> {
        (self.f)(subscription, routing_key, message).await
    }
}

/// Default handler: logs the message at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    async fn on_message(
        &self,
        subscription: Arc<Subscription>,
        routing_key: String,
        message: Value,
    ) -> Result<(), HandlerError> {
        debug!(%subscription, key = %routing_key, %message, "unhandled event");
        Ok(())
    }
}
