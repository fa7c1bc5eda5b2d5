//! Error types used by the event-bus connectivity layer.
//!
//! This module defines four error enums:
//!
//! - [`EventError`]: failures talking to the broker (connect, declare, publish).
//! - [`RelayError`]: failures delivering one inbound message to its handler.
//! - [`FeatureError`]: misuse of the [`Features`](crate::Features) registry.
//! - [`SetupError`]: service wiring that also installs the global log subscriber.
//!
//! All of them provide `as_label` for logs/metrics. [`EventError::is_connectivity`]
//! separates transport failures from protocol-level refusals.

use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::util::TryInitError;

/// Error type returned by message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// # Errors produced while talking to the broker.
///
/// The [`Listener`](crate::Listener) recovers from every variant by reconnecting.
/// The [`Publisher`](crate::Publisher) retries its connection step once, then
/// surfaces the error to the caller.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EventError {
    /// Could not open a connection or channel.
    #[error("failed to connect to {address}: {reason}")]
    Connect {
        /// Broker address that was dialed.
        address: String,
        /// Underlying transport error.
        reason: String,
    },

    /// A previously opened session is no longer usable.
    #[error("connection broken: {reason}")]
    ConnectionBroken {
        /// Why the session was considered broken.
        reason: String,
    },

    /// The open check did not answer in time (silently dead connection).
    #[error("open check timed out after {timeout:?}")]
    OpenCheckTimeout {
        /// The configured open-check timeout.
        timeout: Duration,
    },

    /// Declaring an exchange, queue, binding or consumer failed.
    #[error("failed to declare {what}: {reason}")]
    Declare {
        /// Object being declared (e.g. `exchange "brewblox"`).
        what: String,
        /// Broker-reported reason.
        reason: String,
    },

    /// Sending a message failed.
    #[error("failed to publish to {exchange} ({routing}): {reason}")]
    Publish {
        /// Target exchange.
        exchange: String,
        /// Routing key of the message.
        routing: String,
        /// Broker-reported reason.
        reason: String,
    },

    /// The payload could not be serialized to JSON.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl EventError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use eventvisor::EventError;
    ///
    /// let err = EventError::ConnectionBroken { reason: "closed".into() };
    /// assert_eq!(err.as_label(), "connection_broken");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            EventError::Connect { .. } => "connect_failed",
            EventError::ConnectionBroken { .. } => "connection_broken",
            EventError::OpenCheckTimeout { .. } => "open_check_timeout",
            EventError::Declare { .. } => "declare_failed",
            EventError::Publish { .. } => "publish_failed",
            EventError::Encode(_) => "encode_failed",
        }
    }

    /// Indicates a transport-level failure (as opposed to a broker refusal).
    ///
    /// # Example
    /// ```
    /// use eventvisor::EventError;
    ///
    /// let broken = EventError::ConnectionBroken { reason: "eof".into() };
    /// assert!(broken.is_connectivity());
    ///
    /// let refused = EventError::Declare { what: "exchange \"x\"".into(), reason: "type".into() };
    /// assert!(!refused.is_connectivity());
    /// ```
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            EventError::Connect { .. }
                | EventError::ConnectionBroken { .. }
                | EventError::OpenCheckTimeout { .. }
        )
    }

    pub(crate) fn broken(reason: impl Into<String>) -> Self {
        EventError::ConnectionBroken {
            reason: reason.into(),
        }
    }

    pub(crate) fn declare(what: impl Into<String>, reason: impl ToString) -> Self {
        EventError::Declare {
            what: what.into(),
            reason: reason.to_string(),
        }
    }
}

/// # Errors raised while relaying a single inbound message.
///
/// These never leave [`Subscription::relay`](crate::Subscription::relay); they are
/// logged and the consumer moves on to the next message.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RelayError {
    /// Message body was not valid JSON.
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// The handler returned an error.
    #[error("handler failed: {0}")]
    Handler(HandlerError),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl RelayError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RelayError::Decode(_) => "relay_decode",
            RelayError::Handler(_) => "relay_handler",
            RelayError::Panicked(_) => "relay_panicked",
        }
    }
}

/// # Errors produced by the feature registry.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureError {
    /// A feature is already registered under this key.
    #[error("feature \"{0}\" already registered")]
    Duplicate(String),

    /// Nothing is registered under this key.
    #[error("no feature found for \"{0}\"")]
    Missing(String),

    /// A feature was found but has a different type.
    #[error("feature \"{key}\" is not a {expected}")]
    TypeMismatch {
        /// Lookup key.
        key: String,
        /// Requested type name.
        expected: &'static str,
    },
}

impl FeatureError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            FeatureError::Duplicate(_) => "feature_duplicate",
            FeatureError::Missing(_) => "feature_missing",
            FeatureError::TypeMismatch { .. } => "feature_type_mismatch",
        }
    }
}

/// Errors from [`service::setup_with_logging`](crate::service::setup_with_logging).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SetupError {
    /// Registering a component failed.
    #[error(transparent)]
    Feature(#[from] FeatureError),

    /// A global `tracing` subscriber was already installed.
    #[error("failed to install log subscriber: {0}")]
    Logging(#[from] TryInitError),
}

impl SetupError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SetupError::Feature(e) => e.as_label(),
            SetupError::Logging(_) => "logging_init_failed",
        }
    }
}
