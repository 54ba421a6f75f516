//! Exponential backoff shared by stream reconnects and command retries.

use serde::Deserialize;
use std::time::Duration;

/// Configuration for backoff behavior.
///
/// `delay(attempt) = min(base_delay * backoff_factor^attempt, max_delay)`,
/// with `attempt` 0-indexed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Maximum delay between retries.
    pub max_delay_ms: u64,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
    /// Whether to add up to ±25% jitter to the delay.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: false,
        }
    }
}

impl BackoffConfig {
    /// The default config for retrying outbound commands.
    pub fn command() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            backoff_factor: 2.0,
            jitter: true,
        }
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Calculate delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64);

        let final_ms = if self.jitter {
            let jitter_range = capped * 0.25;
            let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
            (capped + jitter).clamp(0.0, self.max_delay_ms as f64)
        } else {
            capped
        };

        Duration::from_millis(final_ms as u64)
    }
}
