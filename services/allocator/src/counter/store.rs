use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CounterBucket, CounterError};

/// Result of an atomic reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// A sequence belongs to this request. `replayed` is true when it was
    /// confirmed by an earlier call with the same request key.
    Reserved { sequence: u32, replayed: bool },

    /// Another call with the same request key holds a live placeholder.
    Pending,

    /// The bucket has issued its last sequence.
    Exhausted,
}

/// Storage for per-bucket sequences and per-request reservations.
///
/// `reserve` must be atomic with respect to every other `reserve` on the
/// same bucket.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Reserves a sequence for `request_key`.
    ///
    /// A confirmed reservation is replayed; a live placeholder yields
    /// [`ReserveOutcome::Pending`]; otherwise the bucket's last value is
    /// incremented and a placeholder expiring at `now + ttl` is written.
    async fn reserve(
        &self,
        bucket: &CounterBucket,
        request_key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<ReserveOutcome, CounterError>;

    /// Makes the placeholder for `request_key` permanent.
    async fn confirm(
        &self,
        bucket: &CounterBucket,
        request_key: &str,
        sequence: u32,
    ) -> Result<(), CounterError>;

    /// The sequence the next reservation would get, or `None` when the
    /// bucket is exhausted.
    async fn peek_next(&self, bucket: &CounterBucket) -> Result<Option<u32>, CounterError>;
}
