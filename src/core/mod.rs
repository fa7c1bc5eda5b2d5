//! Connectivity core: listener and publisher.
//!
//! The public API of this module is [`Listener`] and [`Publisher`].
//!
//! Internal modules:
//! - [`registry`]: pending queue and active list of one listener;
//! - [`worker`]: the reconnecting listener loop;
//! - [`listener`]: subscription intake and loop ownership;
//! - [`publisher`]: lazily connected sender with a single retry.

mod listener;
mod publisher;
mod registry;
mod worker;

pub use listener::Listener;
pub use publisher::Publisher;
