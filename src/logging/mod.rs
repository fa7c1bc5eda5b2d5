//! # Logging: subscriber setup and log forwarding to the event bus.
//!
//! - [`init`] installs the global `tracing` subscriber.
//! - [`LogForwarder`] republishes `INFO`+ records on the service-logs exchange,
//!   fed by its [`ForwardLayer`].

mod forwarder;
mod init;

pub use forwarder::{ForwardLayer, LogForwarder, LogRecord};
pub use init::init;
