//! Skew-corrected rescheduling.
//!
//! A retry target is persisted as a wall-clock timestamp, but the wall clock
//! can jump between the moment an attempt fails and the moment its retry is
//! scheduled. The target is anchored on the wall clock as read at scheduling
//! time, so a jump before that point cannot stretch or shrink the delay, and
//! it is clamped into `(now, now + max_delay]`. The divergence between the
//! two clocks is measured separately and reported as `skew`.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::Clock;

/// Smallest gap between "now" and a rescheduled time.
pub const MIN_RESCHEDULE_STEP: Duration = Duration::from_millis(1);

/// Spans longer than this are treated as this long; nothing in the core
/// waits anywhere near it.
const MAX_SPAN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A paired wall-clock and monotonic reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    pub wall: DateTime<Utc>,
    pub monotonic: Duration,
}

impl ClockReading {
    pub fn capture(clock: &dyn Clock) -> Self {
        Self {
            wall: clock.now(),
            monotonic: clock.monotonic(),
        }
    }
}

/// Outcome of [`compute_next_available_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reschedule {
    /// When the work becomes eligible again.
    pub available_at: DateTime<Utc>,

    /// `available_at − now.wall`.
    pub delay: Duration,

    /// Wall-clock elapsed minus monotonic elapsed between the two readings.
    /// Positive when the wall clock jumped ahead.
    pub skew: chrono::Duration,
}

/// Computes the next eligible time for work that failed at `failure`,
/// rescheduled at `now`, with `delay` chosen by the backoff policy.
pub fn compute_next_available_at(
    failure: ClockReading,
    now: ClockReading,
    delay: Duration,
    max_delay: Duration,
) -> Reschedule {
    let elapsed_monotonic = signed(now.monotonic.saturating_sub(failure.monotonic));
    let skew = (now.wall - failure.wall) - elapsed_monotonic;

    let target = now.wall + signed(delay);
    let floor = now.wall + signed(MIN_RESCHEDULE_STEP);
    let ceiling = now.wall + signed(max_delay.max(MIN_RESCHEDULE_STEP));
    let available_at = target.clamp(floor, ceiling);

    Reschedule {
        available_at,
        delay: (available_at - now.wall)
            .to_std()
            .unwrap_or(MIN_RESCHEDULE_STEP),
        skew,
    }
}

fn signed(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d.min(MAX_SPAN)).unwrap_or_else(|_| chrono::Duration::zero())
}
