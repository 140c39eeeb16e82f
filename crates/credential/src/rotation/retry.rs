//! Retry policy with exponential backoff
//!
//! Drives the bounded key-generation retry loop. The budget counts every
//! attempt, the first one included.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ConfigError;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, the first one included
    pub max_attempts: u32,

    /// Backoff before the second attempt
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Backoff multiplier (typically 2.0 for exponential)
    pub backoff_multiplier: f32,

    /// Maximum backoff duration
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom parameters
    pub fn new(
        max_attempts: u32,
        initial_backoff: Duration,
        backoff_multiplier: f32,
        max_backoff: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            backoff_multiplier,
            max_backoff,
        }
    }

    /// Policy that retries without waiting
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, 1.0, Duration::ZERO)
    }

    /// Calculate the backoff after the given failed attempt (0-based)
    ///
    /// Applies exponential backoff with ±10% jitter to prevent thundering herd.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base_ms = self.initial_backoff.as_millis() as f32;
        let multiplier = self
            .backoff_multiplier
            .powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let backoff_ms = base_ms * multiplier;

        let jitter = rand::rng().random_range(0.9..=1.1);
        let jittered_ms = (backoff_ms * jitter) as u64;

        Duration::from_millis(jittered_ms).min(self.max_backoff)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Check parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "generation_retry.max_attempts".into(),
                reason: "must allow at least one attempt".into(),
            });
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "generation_retry.backoff_multiplier".into(),
                reason: format!("must be >= 1.0, got {}", self.backoff_multiplier),
            });
        }

        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::InvalidValue {
                field: "generation_retry.max_backoff".into(),
                reason: "must not be shorter than initial_backoff".into(),
            });
        }

        Ok(())
    }
}
