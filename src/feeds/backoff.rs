//! Capped exponential reconnect backoff

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub initial_secs: f64,
    pub multiplier: f64,
    pub max_secs: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_secs: 1.0,
            multiplier: 1.6,
            max_secs: 15.0,
        }
    }
}

/// Deterministic backoff: `initial * multiplier^attempt`, clamped at `max`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    current_secs: f64,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current_secs: config.initial_secs,
            attempt: 0,
        }
    }

    /// Delay to wait now; advances the sequence for the next failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_secs.min(self.config.max_secs);
        self.current_secs = (self.current_secs * self.config.multiplier).min(self.config.max_secs);
        self.attempt += 1;
        Duration::from_secs_f64(delay.max(0.0))
    }

    /// Called on every successful (re)connect.
    pub fn reset(&mut self) {
        self.current_secs = self.config.initial_secs;
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
