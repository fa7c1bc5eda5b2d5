//! # eventvisor
//!
//! **Eventvisor** connects an async service to an AMQP event bus and keeps it
//! connected. Subscriptions survive broker restarts, publishing connects
//! lazily, and log records can be forwarded to the bus.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   subscribe(exchange, routing)                 publish(exchange, routing, &msg)
//!            │                                              │
//!            ▼                                              ▼
//! ┌─────────────────────────────┐            ┌─────────────────────────────┐
//! │ Listener                    │            │ Publisher                   │
//! │  - deferred (before startup)│            │  - one cached Session       │
//! │  - pending (FIFO)           │            │  - ensure step retried once │
//! │  - active (insertion order) │            └──────────────┬──────────────┘
//! └──────────────┬──────────────┘                           │
//!                ▼                                          │   ▲
//! ┌─────────────────────────────┐                           │   │ publish
//! │ ListenerWorker (task)       │                           │ ┌─┴───────────────┐
//! │  Connecting → Idle ⇄        │                           │ │ LogForwarder    │
//! │  Declaring → ReconnectWait  │                           │ │ (drain task)    │
//! └──────────────┬──────────────┘                           │ └─▲───────────────┘
//!                ▼                                          ▼   │ ForwardLayer
//!        Session (Connector) ─────────── AMQP 0-9-1 ──── Session │ (tracing INFO+)
//!                                                               │
//!   lifecycle Events ──► Bus (broadcast) ──► bus.subscribe()    │
//! ```
//!
//! ### Reconnect cycle
//! ```text
//! loop {
//!   ├─► connect()                        err ─► ReconnectWait
//!   ├─► redeclare every active subscription (in order)
//!   ├─► Idle: ensure_open() (bounded) ─► wait pending head (5 s)
//!   │       ├─ timeout  ─► Idle
//!   │       └─ head     ─► Declaring: declare, promote pending → active
//!   └─► ReconnectWait: warn once per outage, sleep(backoff), Connecting
//! }
//! token cancelled at any await ─► close session ─► ListenerStopped
//! ```
//!
//! ## Features
//! | Area              | Description                                               | Key types / traits                           |
//! |-------------------|-----------------------------------------------------------|----------------------------------------------|
//! | **Subscribe**     | Reconnect-safe subscriptions with swappable handlers.     | [`Listener`], [`Subscription`], [`Handler`]  |
//! | **Publish**       | Lazily connected JSON publishing.                         | [`Publisher`]                                |
//! | **Transports**    | AMQP over `lapin`, or an in-process broker.               | [`AmqpConnector`], [`MemoryBroker`]          |
//! | **Logging**       | `tracing` setup and log forwarding to the bus.            | [`logging::init`], [`LogForwarder`]          |
//! | **Lifecycle**     | Keyed component registry with start/stop hooks.           | [`Features`], [`Lifecycle`], [`service`]     |
//! | **Observability** | Broadcast of connection and subscription events.          | [`Bus`], [`Event`], [`EventKind`]            |
//! | **Configuration** | Broker address, timeouts, backoff, log forwarding.        | [`Config`], [`BackoffPolicy`]                |
//!
//! ## Optional features
//! - `http`: debug routes `POST /_debug/publish` and `POST /_debug/subscribe` (axum).
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use eventvisor::{Config, Features, HandlerFn, MemoryBroker, Subscription, SubscriptionSpec, service};
//! use serde_json::{Value, json};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = MemoryBroker::new();
//!     let cfg = Config::new("sparkey", "localhost");
//!
//!     let mut features = Features::new();
//!     service::setup(&mut features, &cfg, Arc::new(broker.connector()))?;
//!
//!     let listener = service::get_listener(&features)?;
//!     listener.subscribe_spec(SubscriptionSpec::new("brewblox", "controller.*").with_handler(
//!         HandlerFn::arc(|sub: Arc<Subscription>, key: String, msg: Value| async move {
//!             println!("{sub} {key}: {msg}");
//!             Ok(())
//!         }),
//!     ));
//!
//!     features.startup_all().await;
//!     service::get_publisher(&features)?
//!         .publish("brewblox", "controller.value", &json!({"temp": 21}))
//!         .await?;
//!     features.shutdown_all().await;
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod features;
mod policies;
mod session;
mod subscription;

pub mod logging;
pub mod routing;
pub mod service;

#[cfg(feature = "http")]
pub mod http;

// ---- Public re-exports ----

pub use config::{Config, EVENTBUS_PORT, LOGGING_EXCHANGE};
pub use core::{Listener, Publisher};
pub use error::{EventError, FeatureError, HandlerError, RelayError, SetupError};
pub use events::{Bus, Event, EventKind};
pub use features::{Features, Lifecycle};
pub use logging::{ForwardLayer, LogForwarder, LogRecord};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use routing::ExchangeKind;
pub use session::{
    AmqpConnector, AmqpSession, BrokerOp, Connector, ConnectorRef, MemoryBroker, MemoryConnector,
    MemorySession, Session,
};
pub use subscription::{Handler, HandlerFn, HandlerRef, LogHandler, Subscription, SubscriptionSpec};
