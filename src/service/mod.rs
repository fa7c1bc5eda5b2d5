//! # Service wiring.
//!
//! [`setup`] builds the connectivity components for one service and registers
//! them in a [`Features`] registry:
//!
//! ```text
//! setup(features, cfg, connector)
//!   ├─► Bus            (plain feature)
//!   ├─► Listener       (managed)  ─┐ startup order
//!   ├─► Publisher      (managed)   │
//!   └─► LogForwarder   (managed)  ─┘ shutdown runs in reverse: forwarder first
//! ```
//!
//! Listener and Publisher each own their own session; the forwarder publishes
//! through the shared Publisher.
//!
//! The forwarder only sees records once its [`ForwardLayer`](crate::ForwardLayer)
//! is part of the global `tracing` subscriber. [`setup_with_logging`] does both
//! steps; with plain [`setup`] the caller installs the layer, e.g. through
//! [`logging::init`](crate::logging::init).
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use eventvisor::{Config, Features, MemoryBroker, service};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = MemoryBroker::new();
//! let cfg = Config::new("sparkey", "localhost");
//! let mut features = Features::new();
//! service::setup(&mut features, &cfg, Arc::new(broker.connector()))?;
//!
//! service::get_listener(&features)?.subscribe("brewblox", "controller.#");
//! service::run_until_signal(&features).await?;
//! # Ok(())
//! # }
//! ```

mod signal;

pub use signal::wait_for_signal;

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::core::{Listener, Publisher};
use crate::error::{FeatureError, SetupError};
use crate::events::Bus;
use crate::features::Features;
use crate::logging::{self, LogForwarder};
use crate::session::{AmqpConnector, ConnectorRef};

/// Registers the event bus, listener, publisher and log forwarder.
///
/// Does not touch the global `tracing` subscriber: install
/// [`get_forwarder`]`(..).layer()` yourself, or use [`setup_with_logging`].
pub fn setup(
    features: &mut Features,
    cfg: &Config,
    connector: ConnectorRef,
) -> Result<(), FeatureError> {
    let bus = Bus::new(cfg.bus_capacity_clamped());
    let listener = Arc::new(Listener::new(cfg, Arc::clone(&connector), bus.clone()));
    let publisher = Arc::new(Publisher::new(cfg, connector, bus.clone()));
    let forwarder = Arc::new(LogForwarder::new(cfg, Arc::clone(&publisher)));

    features.add(Arc::new(bus), false)?;
    features.add_managed(listener, false)?;
    features.add_managed(publisher, false)?;
    features.add_managed(forwarder, false)?;
    Ok(())
}

/// [`setup`], then installs the global `tracing` subscriber with the log
/// forwarder attached (see [`logging::init`] for `default_filter`).
///
/// Fails with [`SetupError::Logging`] if a global subscriber already exists;
/// the components stay registered in that case.
pub fn setup_with_logging(
    features: &mut Features,
    cfg: &Config,
    connector: ConnectorRef,
    default_filter: &str,
) -> Result<(), SetupError> {
    setup(features, cfg, connector)?;
    let layer = get_forwarder(features)?.layer();
    logging::init(default_filter, Some(layer))?;
    Ok(())
}

/// [`setup`] with an AMQP connector for `cfg.host:cfg.port`.
pub fn setup_amqp(features: &mut Features, cfg: &Config) -> Result<(), FeatureError> {
    setup(features, cfg, Arc::new(AmqpConnector::new(cfg)))
}

/// The registered [`Listener`].
pub fn get_listener(features: &Features) -> Result<Arc<Listener>, FeatureError> {
    features.get::<Listener>()
}

/// The registered [`Publisher`].
pub fn get_publisher(features: &Features) -> Result<Arc<Publisher>, FeatureError> {
    features.get::<Publisher>()
}

/// The registered [`LogForwarder`].
///
/// Its [`layer`](LogForwarder::layer) must be installed in the global
/// subscriber for records to reach the bus.
pub fn get_forwarder(features: &Features) -> Result<Arc<LogForwarder>, FeatureError> {
    features.get::<LogForwarder>()
}

/// The registered lifecycle event [`Bus`].
pub fn get_bus(features: &Features) -> Result<Arc<Bus>, FeatureError> {
    features.get::<Bus>()
}

/// Runs startup hooks, waits for a termination signal, then runs shutdown hooks.
pub async fn run_until_signal(features: &Features) -> std::io::Result<()> {
    features.startup_all().await;
    let res = wait_for_signal().await;
    match &res {
        Ok(name) => info!(signal = name, "shutting down"),
        Err(e) => info!("signal handling unavailable, shutting down: {e}"),
    }
    features.shutdown_all().await;
    res.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryBroker;

    #[tokio::test]
    async fn setup_registers_every_component_once() {
        let broker = MemoryBroker::new();
        let cfg = Config::new("svc", "localhost");
        let mut features = Features::new();
        setup(&mut features, &cfg, Arc::new(broker.connector())).unwrap();

        assert!(get_listener(&features).is_ok());
        assert!(get_publisher(&features).is_ok());
        assert!(get_forwarder(&features).is_ok());
        assert!(get_bus(&features).is_ok());

        let again = setup(&mut features, &cfg, Arc::new(broker.connector()));
        assert_eq!(again.unwrap_err().as_label(), "feature_duplicate");
    }

    #[tokio::test]
    async fn hooks_start_and_stop_the_components() {
        let broker = MemoryBroker::new();
        let cfg = Config::new("svc", "localhost");
        let mut features = Features::new();
        setup(&mut features, &cfg, Arc::new(broker.connector())).unwrap();
        let listener = get_listener(&features).unwrap();
        let forwarder = get_forwarder(&features).unwrap();
        listener.subscribe("ex", "k");

        features.startup_all().await;
        assert!(listener.is_running());
        assert!(forwarder.is_running());

        features.shutdown_all().await;
        assert!(!listener.is_running());
        assert!(!forwarder.is_running());
    }
}
