//! # Broadcast bus for connectivity events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]. The listener
//! loop and the publisher publish into it; tests and operators subscribe to
//! observe state changes.
//!
//! ```text
//! Publishers:                         Receivers (any number):
//!   ListenerWorker ──┐
//!   Listener       ──┼────► Bus ────► bus.subscribe() ─► recv()
//!   Publisher      ──┘  (broadcast)
//! ```
//!
//! ## Rules
//! - `publish()` never blocks.
//! - Events sent while nobody is subscribed are dropped.
//! - Slow receivers get `RecvError::Lagged(n)` and skip the `n` oldest events.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for connectivity events.
///
/// Cheap to clone (internally an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver observing events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_only_see_later_events() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::Connected));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::ListenerStopped));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::ListenerStopped);
    }
}
