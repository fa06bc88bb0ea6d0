//! Exponential backoff with bounded jitter.

use crate::error::{Result, SyncError};
use rand::Rng;
use std::time::Duration;

/// Exponential backoff policy.
///
/// The delay for attempt `n` (1-based) is `initial * multiplier^(n-1)` plus up
/// to `jitter` of itself, capped at `max`. Keeping `jitter <= multiplier - 1`
/// makes successive delays non-decreasing.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial: Duration,

    /// Upper bound for any delay.
    pub max: Duration,

    /// Growth factor per attempt.
    pub multiplier: f64,

    /// Extra random delay as a fraction of the base delay.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Policy without jitter, mostly useful in tests.
    pub fn fixed_growth(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
            jitter: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial.is_zero() {
            return Err(SyncError::Configuration(
                "backoff initial delay must be non-zero".to_string(),
            ));
        }
        if self.max < self.initial {
            return Err(SyncError::Configuration(format!(
                "backoff max {:?} is below initial {:?}",
                self.max, self.initial
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(SyncError::Configuration(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !self.jitter.is_finite() || self.jitter < 0.0 || self.jitter > self.multiplier - 1.0 {
            return Err(SyncError::Configuration(format!(
                "backoff jitter must be within [0, multiplier - 1], got {}",
                self.jitter
            )));
        }
        Ok(())
    }

    /// Delay for a 1-based attempt number, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        self.cap(secs)
    }

    /// Delay for a 1-based attempt number, with jitter.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base >= self.max {
            return base;
        }
        let factor = 1.0 + rng.random_range(0.0..=self.jitter);
        self.cap(base.as_secs_f64() * factor)
    }

    fn cap(&self, secs: f64) -> Duration {
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}
