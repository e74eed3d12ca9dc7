//! Delay before a failed pass is retried

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default delay between a failed pass and its retry
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

/// How the retry delay grows with consecutive failures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffStrategy {
    /// Retry immediately
    None,
    /// Same delay every time
    #[default]
    FixedDelay,
    /// Delay multiplied by `backoff-multiplier` per consecutive failure
    ExponentialBackoff,
    /// Delay grows by `initial-delay-ms` per consecutive failure
    LinearBackoff,
}

/// Retry delay configuration for the convergence driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackoffPolicy {
    #[serde(default)]
    pub strategy: BackoffStrategy,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add up to 25% random delay
    #[serde(default)]
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

fn default_initial_delay() -> u64 {
    DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_max_delay() -> u64 {
    600_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl BackoffPolicy {
    /// A fixed delay without jitter
    pub fn fixed(delay: Duration) -> Self {
        let millis = delay.as_millis() as u64;
        Self {
            strategy: BackoffStrategy::FixedDelay,
            initial_delay_ms: millis,
            max_delay_ms: millis.max(default_max_delay()),
            ..Self::default()
        }
    }

    /// Delay before the retry following `failures` consecutive failed passes
    ///
    /// The first failure waits `initial-delay-ms`; growth is capped at
    /// `max-delay-ms` before jitter is added.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let earlier_failures = failures.saturating_sub(1);
        let grown_ms = match self.strategy {
            BackoffStrategy::None => 0,
            BackoffStrategy::FixedDelay => self.initial_delay_ms,
            BackoffStrategy::ExponentialBackoff => {
                let factor = self.backoff_multiplier.powi(earlier_failures as i32);
                (self.initial_delay_ms as f64 * factor) as u64
            }
            BackoffStrategy::LinearBackoff => {
                self.initial_delay_ms.saturating_mul(u64::from(failures.max(1)))
            }
        };

        let delay_ms = grown_ms.min(self.max_delay_ms);
        if !self.jitter || delay_ms == 0 {
            return Duration::from_millis(delay_ms);
        }
        let extra_ms = rand::rng().random_range(0..=delay_ms / 4);
        Duration::from_millis(delay_ms + extra_ms)
    }
}
