//! Wall-clock and monotonic time sources.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A pluggable time source.
pub trait Clock: Send + Sync {
    /// Current wall-clock time. May jump in either direction.
    fn now(&self) -> DateTime<Utc>;

    /// Time elapsed since an arbitrary fixed origin. Never goes backwards.
    fn monotonic(&self) -> Duration;
}

/// Suspends the current task.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// The process clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
struct ManualState {
    wall: DateTime<Utc>,
    monotonic: Duration,
    sleeps: Vec<Duration>,
}

/// A clock that only moves when told to.
///
/// As a [`Sleeper`] it advances both readings by the requested duration,
/// records the request, and yields to the runtime.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                wall: start,
                monotonic: Duration::ZERO,
                sleeps: Vec::new(),
            }),
        }
    }

    /// Advances wall and monotonic time together.
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.monotonic += by;
        state.wall += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    /// Moves only the wall clock, as an NTP step or operator change would.
    pub fn jump_wall(&self, by: chrono::Duration) {
        let mut state = self.lock();
        state.wall += by;
    }

    /// Durations passed to [`Sleeper::sleep`] so far.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().wall
    }

    fn monotonic(&self) -> Duration {
        self.lock().monotonic
    }
}

#[async_trait]
impl Sleeper for ManualClock {
    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.lock();
            state.sleeps.push(duration);
        }
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 23, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_manual_clock_advance_moves_both_readings() {
        let clock = ManualClock::new(start());
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), start() + chrono::Duration::seconds(5));
        assert_eq!(clock.monotonic(), Duration::from_secs(5));
    }

    #[test]
    fn test_manual_clock_wall_jump_leaves_monotonic() {
        let clock = ManualClock::new(start());
        clock.jump_wall(chrono::Duration::seconds(-120));
        assert_eq!(clock.now(), start() - chrono::Duration::seconds(120));
        assert_eq!(clock.monotonic(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_manual_clock_sleep_records_and_advances() {
        let clock = ManualClock::new(start());
        clock.sleep(Duration::from_millis(250)).await;
        clock.sleep(Duration::from_millis(500)).await;
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(250), Duration::from_millis(500)]
        );
        assert_eq!(clock.monotonic(), Duration::from_millis(750));
    }

    #[test]
    fn test_system_clock_monotonic_does_not_regress() {
        let clock = SystemClock::new();
        let a = clock.monotonic();
        let b = clock.monotonic();
        assert!(b >= a);
    }
}
