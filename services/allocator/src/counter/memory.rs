use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{CounterBucket, CounterError, ReserveOutcome, SequenceStore, MAX_SEQUENCE};

#[derive(Debug, Clone, Copy)]
struct Reservation {
    sequence: u32,
    /// `None` once confirmed.
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct BucketState {
    last_value: u32,
    reservations: HashMap<String, Reservation>,
}

/// Process-local [`SequenceStore`]. One lock covers every bucket.
#[derive(Debug, Default)]
pub struct InMemorySequenceStore {
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl InMemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a bucket's last issued value.
    pub async fn seed(&self, bucket: &CounterBucket, last_value: u32) {
        let mut buckets = self.buckets.lock().await;
        buckets.entry(bucket.key()).or_default().last_value = last_value;
    }

    pub async fn last_value(&self, bucket: &CounterBucket) -> u32 {
        let buckets = self.buckets.lock().await;
        buckets.get(&bucket.key()).map_or(0, |state| state.last_value)
    }
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn reserve(
        &self,
        bucket: &CounterBucket,
        request_key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<ReserveOutcome, CounterError> {
        let mut buckets = self.buckets.lock().await;
        let state = buckets.entry(bucket.key()).or_default();

        if let Some(existing) = state.reservations.get(request_key) {
            match existing.expires_at {
                None => {
                    return Ok(ReserveOutcome::Reserved {
                        sequence: existing.sequence,
                        replayed: true,
                    })
                }
                Some(expires_at) if expires_at > now => return Ok(ReserveOutcome::Pending),
                Some(_) => {}
            }
        }

        if state.last_value >= MAX_SEQUENCE {
            return Ok(ReserveOutcome::Exhausted);
        }

        state.last_value += 1;
        let sequence = state.last_value;
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        state.reservations.insert(
            request_key.to_string(),
            Reservation {
                sequence,
                expires_at: Some(now + ttl),
            },
        );

        Ok(ReserveOutcome::Reserved {
            sequence,
            replayed: false,
        })
    }

    async fn confirm(
        &self,
        bucket: &CounterBucket,
        request_key: &str,
        sequence: u32,
    ) -> Result<(), CounterError> {
        let mut buckets = self.buckets.lock().await;
        let reservation = buckets
            .get_mut(&bucket.key())
            .and_then(|state| state.reservations.get_mut(request_key))
            .filter(|reservation| reservation.sequence == sequence);

        match reservation {
            Some(reservation) => {
                reservation.expires_at = None;
                Ok(())
            }
            None => Err(CounterError::ReservationLost {
                bucket: bucket.key(),
                request_key: request_key.to_string(),
            }),
        }
    }

    async fn peek_next(&self, bucket: &CounterBucket) -> Result<Option<u32>, CounterError> {
        let last = self.last_value(bucket).await;
        Ok((last < MAX_SEQUENCE).then_some(last + 1))
    }
}
