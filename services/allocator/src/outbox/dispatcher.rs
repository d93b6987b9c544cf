//! Outbox dispatcher.
//!
//! Claims due messages, publishes them, and records the outcome. Each
//! message's lease is renewed just before its publish, so a message whose
//! lease lapsed while earlier messages in the batch were publishing is left
//! to whichever dispatcher claimed it next. Failed
//! publishes are rescheduled with capped exponential backoff, corrected for
//! wall-clock jumps between the failure and the reschedule; once the retry
//! budget is spent the message is dead-lettered.

use std::sync::Arc;
use std::time::Duration;

use pairwise_retry::{compute_next_available_at, BackoffPolicy, Clock, ClockReading};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{OutboxError, OutboxMessage, OutboxStore, PublishError, Publisher};

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub batch_size: usize,
    /// How long a claim hides a message from other dispatchers.
    pub claim_lease: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            claim_lease: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub claimed: usize,
    pub published: usize,
    pub rescheduled: usize,
    pub dead_lettered: usize,
    /// Claimed but skipped because the lease could not be renewed.
    pub lost: usize,
}

pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn Publisher>,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn Publisher>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Runs one sweep and returns the number of messages published.
    pub async fn dispatch_once(&self) -> Result<usize, OutboxError> {
        Ok(self.sweep().await?.published)
    }

    /// Runs one sweep.
    pub async fn sweep(&self) -> Result<SweepStats, OutboxError> {
        let lease = to_chrono(self.config.claim_lease);
        let now = self.clock.now();
        let lease_until = now + lease;
        let batch = self
            .store
            .claim_due(now, lease_until, self.config.batch_size)
            .await?;

        let mut stats = SweepStats {
            claimed: batch.len(),
            ..SweepStats::default()
        };
        if batch.is_empty() {
            return Ok(stats);
        }
        debug!(claimed = stats.claimed, "Claimed outbox messages");

        for message in batch {
            let now = self.clock.now();
            if !self
                .store
                .renew_claim(&message.event_id, lease_until, now, now + lease)
                .await?
            {
                warn!(event_id = %message.event_id, "Claim lapsed before publish, skipping");
                stats.lost += 1;
                continue;
            }

            let headers = message.headers();
            match self
                .publisher
                .publish(&message.event_type, &message.payload, &headers)
                .await
            {
                Ok(()) => {
                    if self
                        .store
                        .mark_sent(&message.event_id, self.clock.now())
                        .await?
                    {
                        stats.published += 1;
                    } else {
                        warn!(event_id = %message.event_id, "Message settled by another dispatcher");
                    }
                }
                Err(e) => {
                    let failure = ClockReading::capture(self.clock.as_ref());
                    if self.handle_failure(&message, failure, &e).await? {
                        stats.dead_lettered += 1;
                    } else {
                        stats.rescheduled += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Returns true when the message was dead-lettered.
    async fn handle_failure(
        &self,
        message: &OutboxMessage,
        failure: ClockReading,
        publish_error: &PublishError,
    ) -> Result<bool, OutboxError> {
        let last_error = publish_error.to_string();
        let backoff = &self.config.backoff;

        if backoff.is_exhausted(message.retry_count) {
            self.store
                .mark_failed(&message.event_id, &last_error)
                .await?;
            error!(
                event_id = %message.event_id,
                event_type = %message.event_type,
                retry_count = message.retry_count,
                error = %last_error,
                "Outbox message dead-lettered"
            );
            return Ok(true);
        }

        let now = ClockReading::capture(self.clock.as_ref());
        let delay = backoff.next_delay(message.retry_count);
        let next = compute_next_available_at(failure, now, delay, backoff.cap);

        let updated = self
            .store
            .reschedule(
                &message.event_id,
                message.retry_count,
                next.available_at,
                &last_error,
            )
            .await?;

        if updated {
            warn!(
                event_id = %message.event_id,
                event_type = %message.event_type,
                retry_count = message.retry_count + 1,
                delay_ms = next.delay.as_millis() as u64,
                skew_ms = next.skew.num_milliseconds(),
                available_at = %next.available_at,
                error = %last_error,
                "Publish failed, rescheduled"
            );
        } else {
            warn!(event_id = %message.event_id, "Message changed before reschedule");
        }
        Ok(false)
    }

    /// Sweeps until shutdown, or once when `once` is set.
    ///
    /// Shutdown is observed between sweeps and while sleeping, so an
    /// in-flight publish and its bookkeeping always complete. A dropped
    /// shutdown sender counts as shutdown. A full batch is followed
    /// immediately by another sweep.
    pub async fn run_loop(
        &self,
        once: bool,
        sleep_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> usize {
        let mut published = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let full_batch = match self.sweep().await {
                Ok(stats) => {
                    published += stats.published;
                    if stats.claimed > 0 {
                        info!(
                            claimed = stats.claimed,
                            published = stats.published,
                            rescheduled = stats.rescheduled,
                            dead_lettered = stats.dead_lettered,
                            lost = stats.lost,
                            "Outbox sweep complete"
                        );
                    }
                    stats.claimed >= self.config.batch_size
                }
                Err(e) => {
                    error!(error = %e, "Outbox sweep failed");
                    false
                }
            };

            if once {
                break;
            }
            if full_batch {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(sleep_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        published
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}
