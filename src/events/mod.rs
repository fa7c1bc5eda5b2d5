//! Connectivity events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Listener`, its background `ListenerWorker`, `Publisher`.
//! - **Consumers**: anyone holding a receiver from [`Bus::subscribe`]
//!   (tests, health endpoints, metrics).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
