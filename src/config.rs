//! # Connectivity configuration.
//!
//! Provides [`Config`], the settings shared by the [`Listener`](crate::Listener),
//! the [`Publisher`](crate::Publisher) and the [`LogForwarder`](crate::LogForwarder).
//!
//! The broker host is the only required value; everything else has a default.
//!
//! ## Sentinel values
//! - `log_queue_capacity = 0` → clamped to 1
//! - `bus_capacity = 0` → clamped to 1

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Default AMQP port.
pub const EVENTBUS_PORT: u16 = 5672;

/// Default exchange receiving forwarded log records.
pub const LOGGING_EXCHANGE: &str = "service-logs";

/// Settings for the event-bus connectivity layer.
///
/// ## Field semantics
/// - `reconnect`: delay between listener reconnect attempts (constant 1s by default)
/// - `pending_timeout`: how long the listener waits on its pending queue before
///   re-checking that the connection is still open
/// - `open_check_timeout`: bound on a single open check; a connection that does
///   not answer in time is abandoned
/// - `log_retry`: delay before the log forwarder retries a failed publish
#[derive(Clone, Debug)]
pub struct Config {
    /// Service name, used as the first segment of forwarded log routing keys.
    pub service_name: String,
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Reconnect backoff for the listener loop.
    pub reconnect: BackoffPolicy,
    /// Wait bound on the pending-subscription queue.
    pub pending_timeout: Duration,
    /// Wait bound on a single open check.
    pub open_check_timeout: Duration,
    /// Exchange receiving forwarded log records.
    pub log_exchange: String,
    /// Capacity of the log forwarder queue.
    pub log_queue_capacity: usize,
    /// Delay before retrying a failed log publish.
    pub log_retry: Duration,
    /// Capacity of the lifecycle event bus.
    pub bus_capacity: usize,
}

impl Config {
    /// Creates a configuration for `service_name` talking to the broker at `host`.
    ///
    /// ```
    /// use eventvisor::Config;
    ///
    /// let cfg = Config::new("sparkey", "eventbus").with_port(5673);
    /// assert_eq!(cfg.amqp_uri(), "amqp://eventbus:5673/%2f");
    /// ```
    pub fn new(service_name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            host: host.into(),
            port: EVENTBUS_PORT,
            reconnect: BackoffPolicy::default(),
            pending_timeout: Duration::from_secs(5),
            open_check_timeout: Duration::from_secs(5),
            log_exchange: LOGGING_EXCHANGE.to_string(),
            log_queue_capacity: 1024,
            log_retry: Duration::from_secs(1),
            bus_capacity: 1024,
        }
    }

    /// Returns a new config with updated port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Returns a new config with updated reconnect backoff.
    pub fn with_reconnect(mut self, reconnect: BackoffPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Returns a new config with updated pending-queue wait bound.
    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = timeout;
        self
    }

    /// Returns a new config with updated open-check bound.
    pub fn with_open_check_timeout(mut self, timeout: Duration) -> Self {
        self.open_check_timeout = timeout;
        self
    }

    /// Returns a new config with updated log forwarding settings.
    pub fn with_log_forwarding(
        mut self,
        exchange: impl Into<String>,
        capacity: usize,
        retry: Duration,
    ) -> Self {
        self.log_exchange = exchange.into();
        self.log_queue_capacity = capacity;
        self.log_retry = retry;
        self
    }

    /// Broker address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// AMQP URI for the default vhost.
    pub fn amqp_uri(&self) -> String {
        format!("amqp://{}:{}/%2f", self.host, self.port)
    }

    /// Log queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn log_queue_capacity_clamped(&self) -> usize {
        self.log_queue_capacity.max(1)
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_bus_conventions() {
        let cfg = Config::new("svc", "eventbus");
        assert_eq!(cfg.port, 5672);
        assert_eq!(cfg.pending_timeout, Duration::from_secs(5));
        assert_eq!(cfg.reconnect.next(3), Duration::from_secs(1));
        assert_eq!(cfg.log_exchange, LOGGING_EXCHANGE);
        assert_eq!(cfg.address(), "eventbus:5672");
    }

    #[test]
    fn capacities_are_clamped() {
        let cfg = Config::new("svc", "h").with_log_forwarding("logs", 0, Duration::ZERO);
        assert_eq!(cfg.log_queue_capacity_clamped(), 1);
    }
}
