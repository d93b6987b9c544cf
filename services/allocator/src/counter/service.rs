use std::sync::Arc;
use std::time::Duration;

use pairwise_id::NationalId;
use pairwise_retry::{BackoffPolicy, Clock, Sleeper};
use tracing::{debug, error, instrument, warn};

use super::{CounterBucket, CounterError, CounterRecord, ReserveOutcome, SequenceStore};
use crate::domain::Gender;

/// Sequence service configuration.
#[derive(Debug, Clone, Copy)]
pub struct SequenceConfig {
    /// How long an unconfirmed reservation blocks retries of the same request.
    pub placeholder_ttl: Duration,

    /// Backoff between polls of a pending reservation. `max_retries` bounds
    /// the number of waits.
    pub wait: BackoffPolicy,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            placeholder_ttl: Duration::from_secs(30),
            wait: BackoffPolicy::new(Duration::from_millis(50), Duration::from_secs(1), 8),
        }
    }
}

/// Issues counters.
pub struct SequenceService {
    store: Arc<dyn SequenceStore>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    config: SequenceConfig,
}

impl SequenceService {
    pub fn new(
        store: Arc<dyn SequenceStore>,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn Sleeper>,
        config: SequenceConfig,
    ) -> Self {
        Self {
            store,
            clock,
            sleeper,
            config,
        }
    }

    /// Issues, or replays, the counter for one allocation request.
    ///
    /// Calls with the same `student_id` and `correlation_id` resolve to the
    /// same counter.
    #[instrument(skip(self), fields(student_id = %student_id))]
    pub async fn allocate(
        &self,
        year: u32,
        gender: Gender,
        student_id: &NationalId,
        correlation_id: &str,
    ) -> Result<CounterRecord, CounterError> {
        let bucket = CounterBucket::new(year, gender);
        let request_key = format!("{student_id}:{correlation_id}");
        let mut waits = 0u32;

        loop {
            let outcome = self
                .store
                .reserve(
                    &bucket,
                    &request_key,
                    self.clock.now(),
                    self.config.placeholder_ttl,
                )
                .await?;

            match outcome {
                ReserveOutcome::Reserved { sequence, replayed } => {
                    let record = CounterRecord::issue(&bucket, sequence).inspect_err(|e| {
                        error!(bucket = %bucket, sequence, error = %e, "Counter format invariant violated");
                    })?;

                    if !replayed {
                        self.store.confirm(&bucket, &request_key, sequence).await?;
                    }

                    debug!(counter = %record, replayed, "Counter issued");
                    return Ok(record);
                }
                ReserveOutcome::Pending => {
                    if self.config.wait.is_exhausted(waits) {
                        warn!(
                            bucket = %bucket,
                            request_key = %request_key,
                            waits,
                            "Reservation still pending, giving up"
                        );
                        return Err(CounterError::ReservationTimeout {
                            request_key,
                            attempts: waits,
                        });
                    }

                    waits += 1;
                    let delay = self.config.wait.next_delay(waits);
                    debug!(
                        bucket = %bucket,
                        waits,
                        delay_ms = delay.as_millis() as u64,
                        "Reservation pending, waiting"
                    );
                    self.sleeper.sleep(delay).await;
                }
                ReserveOutcome::Exhausted => {
                    error!(bucket = %bucket, "Counter bucket exhausted");
                    return Err(CounterError::Exhausted {
                        bucket: bucket.key(),
                    });
                }
            }
        }
    }

    /// The counter the next allocation in this bucket would receive.
    /// Reserves nothing.
    pub async fn preview(&self, year: u32, gender: Gender) -> Result<CounterRecord, CounterError> {
        let bucket = CounterBucket::new(year, gender);
        match self.store.peek_next(&bucket).await? {
            Some(sequence) => CounterRecord::issue(&bucket, sequence),
            None => Err(CounterError::Exhausted {
                bucket: bucket.key(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{InMemorySequenceStore, MAX_SEQUENCE};
    use chrono::{TimeZone, Utc};
    use pairwise_retry::ManualClock;

    fn student() -> NationalId {
        NationalId::parse("0499370899").unwrap()
    }

    fn setup() -> (Arc<InMemorySequenceStore>, Arc<ManualClock>, SequenceService) {
        let store = Arc::new(InMemorySequenceStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 9, 23, 8, 0, 0).unwrap(),
        ));
        let service = SequenceService::new(
            store.clone(),
            clock.clone(),
            clock.clone(),
            SequenceConfig::default(),
        );
        (store, clock, service)
    }

    #[tokio::test]
    async fn test_allocate_issues_sequential_counters() {
        let (_, _, service) = setup();
        let first = service
            .allocate(1403, Gender::Female, &student(), "c1")
            .await
            .unwrap();
        let second = service
            .allocate(1403, Gender::Female, &student(), "c2")
            .await
            .unwrap();
        assert_eq!(first.as_str(), "033730001");
        assert_eq!(second.as_str(), "033730002");
    }

    #[tokio::test]
    async fn test_retry_replays_same_counter() {
        let (store, _, service) = setup();
        let a = service
            .allocate(1403, Gender::Male, &student(), "c1")
            .await
            .unwrap();
        let b = service
            .allocate(1403, Gender::Male, &student(), "c1")
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(
            store.last_value(&CounterBucket::new(1403, Gender::Male)).await,
            1
        );
    }

    #[tokio::test]
    async fn test_preview_does_not_reserve() {
        let (_, _, service) = setup();
        let preview = service.preview(1403, Gender::Male).await.unwrap();
        assert_eq!(preview.as_str(), "033570001");
        let issued = service
            .allocate(1403, Gender::Male, &student(), "c1")
            .await
            .unwrap();
        assert_eq!(preview, issued);
    }

    #[tokio::test]
    async fn test_exhausted_bucket_is_fatal() {
        let (store, clock, service) = setup();
        store
            .seed(&CounterBucket::new(1403, Gender::Male), MAX_SEQUENCE)
            .await;

        let err = service
            .allocate(1403, Gender::Male, &student(), "c1")
            .await
            .unwrap_err();
        assert!(matches!(err, CounterError::Exhausted { .. }));
        assert!(clock.sleeps().is_empty());
        assert!(service.preview(1403, Gender::Male).await.is_err());
    }

    #[tokio::test]
    async fn test_pending_reservation_times_out() {
        let (store, clock, service) = setup();
        let bucket = CounterBucket::new(1403, Gender::Female);
        // Another process holds the placeholder and never confirms.
        store
            .reserve(
                &bucket,
                &format!("{}:c1", student()),
                clock.now(),
                Duration::from_secs(3600),
            )
            .await
            .unwrap();

        let err = service
            .allocate(1403, Gender::Female, &student(), "c1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CounterError::ReservationTimeout { attempts: 8, .. }
        ));

        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 8);
        assert_eq!(sleeps[0], Duration::from_millis(50));
        assert!(sleeps.iter().all(|d| *d <= Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_racing_retry_replays_once_holder_confirms() {
        let store = Arc::new(InMemorySequenceStore::new());
        let clock = Arc::new(pairwise_retry::SystemClock::new());
        let service = SequenceService::new(
            store.clone(),
            clock.clone(),
            Arc::new(pairwise_retry::TokioSleeper),
            SequenceConfig::default(),
        );
        let bucket = CounterBucket::new(1403, Gender::Male);
        let request_key = format!("{}:c1", student());

        // The first attempt has reserved but not yet confirmed.
        let ReserveOutcome::Reserved { sequence, .. } = store
            .reserve(&bucket, &request_key, clock.now(), Duration::from_secs(30))
            .await
            .unwrap()
        else {
            panic!("expected a fresh reservation");
        };

        let retry = tokio::spawn(async move {
            service
                .allocate(1403, Gender::Male, &student(), "c1")
                .await
        });

        tokio::time::sleep(Duration::from_millis(120)).await;
        store.confirm(&bucket, &request_key, sequence).await.unwrap();

        let record = retry.await.unwrap().unwrap();
        assert_eq!(record.as_str(), "033570001");
        assert_eq!(store.last_value(&bucket).await, 1);
    }

    #[tokio::test]
    async fn test_expired_placeholder_burns_one_sequence() {
        let (store, clock, service) = setup();
        let bucket = CounterBucket::new(1403, Gender::Female);
        store
            .reserve(
                &bucket,
                &format!("{}:c1", student()),
                clock.now(),
                Duration::from_secs(30),
            )
            .await
            .unwrap();
        clock.advance(Duration::from_secs(31));

        let record = service
            .allocate(1403, Gender::Female, &student(), "c1")
            .await
            .unwrap();
        assert_eq!(record.as_str(), "033730002");
        assert!(clock.sleeps().is_empty());
    }
}
