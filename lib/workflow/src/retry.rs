//! Per-node retry policies.
//!
//! Exponential backoff with a delay cap and uniform jitter to spread out
//! retry storms.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for a workflow node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Upper bound on the computed delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Uniform random jitter added on top of the delay, in milliseconds.
    pub jitter_ms: u64,
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and no backoff.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            backoff_multiplier: 1.0,
            max_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    /// Creates an exponential backoff policy with common defaults: three
    /// attempts, 100 ms initial delay, doubling up to 30 s, no jitter.
    #[must_use]
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter_ms: 0,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, initial_delay_ms: u64) -> Self {
        self.initial_delay_ms = initial_delay_ms;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Sets the jitter bound.
    #[must_use]
    pub fn with_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns a reason string when `max_attempts` is zero or the backoff
    /// multiplier is below one.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            return Err("backoff_multiplier must be at least 1.0".to_string());
        }
        Ok(())
    }

    /// Deterministic delay after the given failed attempt (1-based),
    /// before jitter: `min(initial × multiplier^(attempt-1), max)`.
    #[must_use]
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let delay =
            self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent as i32);
        let capped = delay.min(self.max_delay_ms as f64);
        capped as u64
    }

    /// Delay to sleep after the given failed attempt, with jitter applied.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms(attempt);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}
