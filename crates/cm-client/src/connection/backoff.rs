//! Bounded exponential backoff for reconnection

use std::time::Duration;

use cm_core::config::BackoffConfig;

/// Exponential backoff with a cap on the number of attempts
///
/// Attempt `n` (1-based) waits `initial * 2^(n-1)`, plus up to `jitter` of
/// that delay at random. Once `max_attempts` delays have been handed out,
/// [`next_delay`](Self::next_delay) returns `None` until [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max_attempts: u32,
    jitter: f64,
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a new backoff from configuration
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.initial, config.max_attempts, config.jitter)
    }

    /// Create a new backoff with custom parameters
    pub fn new(initial: Duration, max_attempts: u32, jitter: f64) -> Self {
        Self {
            initial,
            max_attempts,
            jitter: jitter.clamp(0.0, 1.0),
            attempts: 0,
        }
    }

    /// Get the next delay and advance, `None` once attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;

        let factor = 2u32.saturating_pow(self.attempts - 1);
        let delay = self.initial.saturating_mul(factor);

        if self.jitter > 0.0 {
            let jitter_amount = delay.as_secs_f64() * self.jitter * rand::random::<f64>();
            return Some(delay + Duration::from_secs_f64(jitter_amount));
        }
        Some(delay)
    }

    /// Number of delays handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}
