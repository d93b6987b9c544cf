//! Capped exponential backoff.

use std::time::Duration;

/// Exponential backoff with a hard cap and a retry budget.
///
/// The delay for attempt `n` is `base · 2^(max(n, 1) − 1)`, capped at `cap`:
/// the first retry waits `base`, then the delay doubles until it reaches the
/// cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay for the first retry.
    pub base: Duration,

    /// Maximum delay for any attempt.
    pub cap: Duration,

    /// Retries allowed before giving up.
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(250),
            cap: Duration::from_secs(2),
            max_retries: 4,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy. A cap below the base is raised to the base.
    pub fn new(base: Duration, cap: Duration, max_retries: u32) -> Self {
        Self {
            base,
            cap: cap.max(base),
            max_retries,
        }
    }

    /// Creates a policy from fractional seconds, returning `None` for
    /// negative or non-finite inputs.
    pub fn from_secs_f64(base: f64, cap: f64, max_retries: u32) -> Option<Self> {
        let base = Duration::try_from_secs_f64(base).ok()?;
        let cap = Duration::try_from_secs_f64(cap).ok()?;
        Some(Self::new(base, cap, max_retries))
    }

    /// Delay before retrying after `attempt` previous retries.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    /// Whether a message that has already been retried `retry_count` times
    /// has used up its budget.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}
