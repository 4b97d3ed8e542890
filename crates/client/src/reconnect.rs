//! Bounded exponential-backoff reconnection for push channels.
//!
//! A push channel that fails to open, errors mid-stream, or ends before a
//! terminal event asks its [`Backoff`] for the next delay. Once
//! [`ReconnectConfig::max_attempts`] consecutive failures have been seen the
//! backoff is exhausted and the channel gives up, leaving the job to the
//! regular poll cycle.

use std::time::Duration;

/// Backoff settings shared by every push channel.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Wait after the first failed connection.
    pub initial_delay: Duration,
    /// Ceiling for the wait between connections.
    pub max_delay: Duration,
    /// Growth factor applied after each failure.
    pub multiplier: f64,
    /// Consecutive failed connections before the channel gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 3,
        }
    }
}

/// Grow `current` by the multiplier, capped at `max_delay`.
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    current.mul_f64(config.multiplier).min(config.max_delay)
}

/// Per-channel failure counter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    failures: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let delay = config.initial_delay;
        Self {
            config,
            failures: 0,
            delay,
        }
    }

    /// Record a failure. Returns the delay to wait before reconnecting, or
    /// `None` once the failure budget is spent.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.config.max_attempts {
            return None;
        }
        let delay = self.delay;
        self.delay = next_delay(self.delay, &self.config);
        Some(delay)
    }

    /// A healthy event arrived; the next failure starts from scratch.
    pub fn reset(&mut self) {
        self.failures = 0;
        self.delay = self.config.initial_delay;
    }

    /// Consecutive failures recorded so far.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}
