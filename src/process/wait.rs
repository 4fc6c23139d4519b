//! Wait Strategy
//!
//! Backoff policy between polling passes. Strategies are pure: they only
//! compute delays, the manager does the sleeping.

use std::time::Duration;

use rand::Rng;

use crate::config::WaitConfig;

pub trait WaitStrategy: Send {
    /// Delay after a pass that found nothing to do
    fn no_work_found(&mut self) -> Duration;

    /// Delay after a pass that advanced at least one process
    fn success(&mut self) -> Duration;

    /// Delay after a pass that failed
    fn error(&mut self) -> Duration;
}

/// Doubles the idle delay on every consecutive empty pass, up to `max`
#[derive(Debug, Clone)]
pub struct ExponentialWaitStrategy {
    base: Duration,
    max: Duration,
    error_delay: Duration,
    jitter: Duration,
    misses: u32,
}

impl ExponentialWaitStrategy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            error_delay: max.max(base),
            jitter: Duration::ZERO,
            misses: 0,
        }
    }

    pub fn with_error_delay(mut self, delay: Duration) -> Self {
        self.error_delay = delay;
        self
    }

    /// Add up to `jitter` of random delay so instances do not poll in lockstep
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn from_config(config: &WaitConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_ms),
            Duration::from_millis(config.max_ms),
        )
        .with_error_delay(Duration::from_millis(config.error_ms))
        .with_jitter(Duration::from_millis(config.jitter_ms))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        delay + Duration::from_millis(extra)
    }
}

impl WaitStrategy for ExponentialWaitStrategy {
    fn no_work_found(&mut self) -> Duration {
        let shift = self.misses.min(16);
        self.misses = self.misses.saturating_add(1);
        let delay = self
            .base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max)
            .min(self.max);
        self.jittered(delay)
    }

    fn success(&mut self) -> Duration {
        self.misses = 0;
        Duration::ZERO
    }

    fn error(&mut self) -> Duration {
        self.jittered(self.error_delay)
    }
}

/// Constant delays; handy in tests
#[derive(Debug, Clone, Copy)]
pub struct FixedWaitStrategy {
    pub idle: Duration,
    pub error: Duration,
}

impl FixedWaitStrategy {
    pub fn new(idle: Duration) -> Self {
        Self { idle, error: idle }
    }
}

impl WaitStrategy for FixedWaitStrategy {
    fn no_work_found(&mut self) -> Duration {
        self.idle
    }

    fn success(&mut self) -> Duration {
        Duration::ZERO
    }

    fn error(&mut self) -> Duration {
        self.error
    }
}
