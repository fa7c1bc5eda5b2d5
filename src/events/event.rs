//! # Lifecycle events emitted by the listener and the publisher.
//!
//! The [`EventKind`] enum classifies events in two groups:
//! - **Listener events**: connection state and subscription movement (pending → active)
//! - **Publisher events**: lazy connection, retry and close
//!
//! The [`Event`] struct carries the optional metadata (component, subscription,
//! error text, reconnect delay).
//!
//! ## Ordering guarantees
//! Each event has a process-wide sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use eventvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ReconnectScheduled)
//!     .with_component("<Listener for \"eventbus:5672\">")
//!     .with_error("connection refused")
//!     .with_delay(Duration::from_secs(1))
//!     .with_attempt(2);
//!
//! assert_eq!(ev.kind, EventKind::ReconnectScheduled);
//! assert_eq!(ev.delay_ms, Some(1000));
//! assert_eq!(ev.error.as_deref(), Some("connection refused"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of connectivity events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Listener ===
    /// A session was opened and every active subscription was redeclared.
    ///
    /// Sets: `component`, `count` (number of replayed subscriptions).
    Connected,

    /// A session failed or was abandoned.
    ///
    /// Sets: `component`, `error`.
    ConnectionLost,

    /// Next connection attempt scheduled.
    ///
    /// Sets: `component`, `delay_ms`, `attempt` (outage attempt, 0-based), `error`.
    ReconnectScheduled,

    /// Subscription stored before startup.
    ///
    /// Sets: `component`, `subscription`.
    SubscriptionDeferred,

    /// Subscription appended to the pending queue.
    ///
    /// Sets: `component`, `subscription`.
    SubscriptionQueued,

    /// Subscription declared on the broker and moved to the active set.
    ///
    /// Sets: `component`, `subscription`.
    SubscriptionDeclared,

    /// Listener loop exited after cancellation.
    ///
    /// Sets: `component`.
    ListenerStopped,

    // === Publisher ===
    /// Publisher opened a new session.
    ///
    /// Sets: `component`.
    PublisherConnected,

    /// First connection attempt of a publish failed; retrying once.
    ///
    /// Sets: `component`, `error`.
    PublisherRetry,

    /// Publisher closed its session.
    ///
    /// Sets: `component`.
    PublisherClosed,
}

/// Connectivity event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Process-wide, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Display name of the emitting component.
    pub component: Option<Arc<str>>,
    /// Display name of the subscription, if applicable.
    pub subscription: Option<Arc<str>>,
    /// Error text, if applicable.
    pub error: Option<Arc<str>>,
    /// Reconnect delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Outage attempt counter.
    pub attempt: Option<u32>,
    /// Generic counter (e.g. replayed subscriptions).
    pub count: Option<usize>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            component: None,
            subscription: None,
            error: None,
            delay_ms: None,
            attempt: None,
            count: None,
        }
    }

    /// Attaches the emitting component name.
    #[inline]
    pub fn with_component(mut self, component: impl Into<Arc<str>>) -> Self {
        self.component = Some(component.into());
        self
    }

    /// Attaches a subscription display name.
    #[inline]
    pub fn with_subscription(mut self, subscription: impl Into<Arc<str>>) -> Self {
        self.subscription = Some(subscription.into());
        self
    }

    /// Attaches error text.
    #[inline]
    pub fn with_error(mut self, error: impl Into<Arc<str>>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attaches a reconnect delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches an outage attempt counter.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a generic counter.
    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(n);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::Connected);
        let b = Event::new(EventKind::ConnectionLost);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn delay_saturates_at_u32() {
        let ev = Event::new(EventKind::ReconnectScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
