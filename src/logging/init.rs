//! Global `tracing` subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

use super::forwarder::ForwardLayer;

/// Installs the global subscriber: env filter, console output and, if given,
/// the log forwarding layer.
///
/// `RUST_LOG` takes precedence over `default_filter`. An invalid
/// `default_filter` falls back to `info`.
pub fn init(default_filter: &str, forward: Option<ForwardLayer>) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(forward)
        .try_init()
}
