//! Reconnect delay policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how the delay between reconnect attempts evolves (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy for many services reconnecting at once
//!
//! ## Wiring
//! ```text
//! Config { reconnect: BackoffPolicy, .. }
//!      └─► core::worker::ListenerWorker
//!           - reconnect.next(outage_attempt) before every Connecting retry
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=1s, factor=1.0 (constant), max=30s, jitter=None.
//!   This is the fixed one-second reconnect interval.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
