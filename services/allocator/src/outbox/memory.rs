use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pairwise_id::EventId;
use tokio::sync::Mutex;

use super::{OutboxError, OutboxMessage, OutboxStatus, OutboxStore};

/// Process-local [`OutboxStore`], kept in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryOutboxStore {
    messages: Mutex<Vec<OutboxMessage>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored message.
    pub async fn all(&self) -> Vec<OutboxMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn count_with_status(&self, status: OutboxStatus) -> usize {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|m| m.status == status)
            .count()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, message: OutboxMessage) -> Result<(), OutboxError> {
        let mut messages = self.messages.lock().await;
        if messages.iter().any(|m| m.event_id == message.event_id) {
            return Err(OutboxError::DuplicateEvent(message.event_id));
        }
        messages.push(message);
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        let mut messages = self.messages.lock().await;

        let mut due: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_pending() && m.available_at <= now)
            .map(|(index, _)| index)
            .collect();
        due.sort_by_key(|index| (messages[*index].available_at, *index));
        due.truncate(limit);

        let claimed = due
            .into_iter()
            .map(|index| {
                let message = &mut messages[index];
                let snapshot = message.clone();
                message.available_at = lease_until;
                snapshot
            })
            .collect();
        Ok(claimed)
    }

    async fn renew_claim(
        &self,
        event_id: &EventId,
        claimed_until: DateTime<Utc>,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, OutboxError> {
        let mut messages = self.messages.lock().await;
        match messages.iter_mut().find(|m| {
            m.event_id == *event_id
                && m.is_pending()
                && m.available_at == claimed_until
                && claimed_until > now
        }) {
            Some(message) => {
                message.available_at = lease_until;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_sent(
        &self,
        event_id: &EventId,
        published_at: DateTime<Utc>,
    ) -> Result<bool, OutboxError> {
        let mut messages = self.messages.lock().await;
        match messages
            .iter_mut()
            .find(|m| m.event_id == *event_id && m.is_pending())
        {
            Some(message) => {
                message.status = OutboxStatus::Sent;
                message.published_at = Some(published_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn reschedule(
        &self,
        event_id: &EventId,
        expected_retry_count: u32,
        available_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<bool, OutboxError> {
        let mut messages = self.messages.lock().await;
        match messages.iter_mut().find(|m| {
            m.event_id == *event_id && m.is_pending() && m.retry_count == expected_retry_count
        }) {
            Some(message) => {
                message.retry_count = expected_retry_count + 1;
                message.available_at = available_at;
                message.last_error = Some(last_error.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_failed(&self, event_id: &EventId, last_error: &str) -> Result<bool, OutboxError> {
        let mut messages = self.messages.lock().await;
        match messages
            .iter_mut()
            .find(|m| m.event_id == *event_id && m.is_pending())
        {
            Some(message) => {
                message.status = OutboxStatus::Failed;
                message.last_error = Some(last_error.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, event_id: &EventId) -> Result<Option<OutboxMessage>, OutboxError> {
        let messages = self.messages.lock().await;
        Ok(messages.iter().find(|m| m.event_id == *event_id).cloned())
    }
}
