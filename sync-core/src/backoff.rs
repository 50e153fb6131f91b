//! Reconnection backoff.
//!
//! The delay starts at a fixed base, doubles after each scheduled reconnect
//! and is capped at a ceiling. A successfully applied message resets it.

use std::time::Duration;

/// Initial reconnect delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Reconnect delay ceiling.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Doubling backoff with a ceiling and optional random jitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    jitter: Duration,
}

impl Backoff {
    /// Create a backoff starting at `base` and capped at `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.min(max);
        Self {
            base,
            max,
            current: base,
            jitter: Duration::ZERO,
        }
    }

    /// Add up to `jitter` of random delay to every returned delay.
    ///
    /// Spreads out reconnects when many clients lose the same server.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// The delay the next reconnect will wait, before jitter.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Take the current delay and double it for the following attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay + self.sample_jitter()
    }

    /// Go back to the base delay.
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    fn sample_jitter(&self) -> Duration {
        let span = self.jitter.as_millis() as u64;
        if span == 0 {
            return Duration::ZERO;
        }
        let mut bytes = [0u8; 8];
        match getrandom::getrandom(&mut bytes) {
            Ok(()) => Duration::from_millis(u64::from_le_bytes(bytes) % (span + 1)),
            Err(_) => Duration::ZERO,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}
