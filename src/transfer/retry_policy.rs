//! Retry policy for failed transfers.
//!
//! Implements capped exponential backoff with configurable parameters.

use super::error::{Classification, TransferError};
use crate::config::TransferSettings;
use std::time::Duration;

/// Retry policy implementing capped exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Create a new RetryPolicy from configuration settings.
    pub fn new(config: &TransferSettings) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_secs(config.initial_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            backoff_multiplier: config.backoff_multiplier,
        }
    }

    /// Total number of attempts, first try included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    pub fn classify(&self, error: &TransferError) -> Classification {
        error.classification()
    }

    /// Check if another attempt should follow the failed attempt `attempt`
    /// (counted from 0).
    pub fn should_retry(&self, error: &TransferError, attempt: u32) -> bool {
        self.classify(error) == Classification::Retryable && attempt < self.max_retries
    }

    /// Backoff before retry number `retry` (counted from 0 at the first retry).
    ///
    /// `initial_backoff * multiplier^retry`, capped at `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.min(i32::MAX as u32) as i32;
        let backoff = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = backoff.min(self.max_backoff.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}
