//! Exponential-backoff policy for the streaming connection.
//!
//! Unlike a long-lived bridge, a detection session only retries a small
//! number of times before settling on one-shot calls for good. The
//! [`TransportClient`](crate::transport::TransportClient) owns the attempt
//! counter; this module only computes delays and the give-up point.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Attempts allowed before degrading to one-shot calls.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 2,
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        (0..attempt).fold(self.initial_delay.min(self.max_delay), |delay, _| {
            next_delay(delay, self)
        })
    }

    /// Whether another attempt may be scheduled after `attempts` so far.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}
