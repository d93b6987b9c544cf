use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pairwise_id::EventId;

use super::{OutboxError, OutboxMessage};

/// Durable outbox storage.
///
/// Every state change is conditional; the boolean results report whether
/// the condition held. Messages are never deleted.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Appends a message outside any allocation transaction.
    async fn enqueue(&self, message: OutboxMessage) -> Result<(), OutboxError>;

    /// Claims up to `limit` pending messages due at `now`, oldest first,
    /// pushing their `available_at` to `lease_until` so other dispatchers
    /// skip them.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, OutboxError>;

    /// Extends a claim to `lease_until`, provided the message is still
    /// pending, still carries the lease `claimed_until` handed out by
    /// [`claim_due`](Self::claim_due), and that lease has not lapsed at `now`.
    /// A `false` result means another dispatcher may own the message.
    async fn renew_claim(
        &self,
        event_id: &EventId,
        claimed_until: DateTime<Utc>,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, OutboxError>;

    /// `PENDING → SENT`.
    async fn mark_sent(
        &self,
        event_id: &EventId,
        published_at: DateTime<Utc>,
    ) -> Result<bool, OutboxError>;

    /// Schedules another attempt, provided the message is still pending at
    /// `expected_retry_count`. The stored retry count becomes
    /// `expected_retry_count + 1`.
    async fn reschedule(
        &self,
        event_id: &EventId,
        expected_retry_count: u32,
        available_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<bool, OutboxError>;

    /// `PENDING → FAILED`. The message leaves dispatch for good.
    async fn mark_failed(&self, event_id: &EventId, last_error: &str) -> Result<bool, OutboxError>;

    async fn get(&self, event_id: &EventId) -> Result<Option<OutboxMessage>, OutboxError>;
}
