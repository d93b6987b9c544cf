//! Time and retry primitives shared by the allocation core.
//!
//! Every component that needs the time takes a [`Clock`] through its
//! constructor instead of reading the system clock, and every component that
//! waits takes a [`Sleeper`]. That keeps backoff, placeholder expiry, and
//! skew correction deterministic under test.
//!
//! # Invariants
//!
//! - [`BackoffPolicy::next_delay`] is non-decreasing in the attempt number
//!   and never exceeds the cap
//! - [`compute_next_available_at`] always returns a time strictly after the
//!   caller's current wall-clock reading

mod backoff;
mod clock;
mod skew;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, Sleeper, SystemClock, TokioSleeper};
pub use skew::{compute_next_available_at, ClockReading, Reschedule, MIN_RESCHEDULE_STEP};
