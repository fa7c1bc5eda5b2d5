//! # Backoff policy for reconnect attempts.
//!
//! [`BackoffPolicy`] controls the wait between two connection attempts while
//! the broker is unreachable. The delay for outage attempt `n` is
//! `first × factor^n`, clamped to `max`, then jittered. The base is derived
//! from the attempt number only, so jitter never feeds back into later delays.
//!
//! The default is a constant one-second interval with no jitter.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use eventvisor::{BackoffPolicy, JitterPolicy};
//!
//! let fixed = BackoffPolicy::default();
//! assert_eq!(fixed.next(0), Duration::from_secs(1));
//! assert_eq!(fixed.next(50), Duration::from_secs(1));
//!
//! let growing = BackoffPolicy {
//!     first: Duration::from_millis(250),
//!     max: Duration::from_secs(4),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//! assert_eq!(growing.next(2), Duration::from_secs(1));
//! assert_eq!(growing.next(10), Duration::from_secs(4));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Reconnect backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect attempt of an outage.
    pub first: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Multiplicative growth factor (`1.0` = constant).
    pub factor: f64,
    /// Jitter applied on top of the computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Constant one-second interval: `first = 1s`, `factor = 1.0`, `max = 30s`.
    fn default() -> Self {
        Self::fixed(Duration::from_secs(1))
    }
}

impl BackoffPolicy {
    /// A constant delay with no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay.max(Duration::from_secs(30)),
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay for the given outage attempt (0-indexed).
    ///
    /// Non-finite or negative intermediate values fall back to `max`.
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}
