use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pairwise_events::{encode, AggregateType, OutboxEvent};
use pairwise_id::EventId;
use serde::{Deserialize, Serialize};

use super::OutboxError;

/// Delivery state of an outbox message.
///
/// Moves only from `Pending` to `Sent` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "SENT" => Ok(OutboxStatus::Sent),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// Headers attached to every publish.
pub type Headers = BTreeMap<&'static str, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub event_id: EventId,
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: OutboxStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxMessage {
    /// Builds a pending message for `event`, due immediately.
    ///
    /// Fails with [`OutboxError::Event`] when the payload exceeds the size
    /// budget.
    pub fn from_event<E: OutboxEvent>(event: &E, occurred_at: DateTime<Utc>) -> Result<Self, OutboxError> {
        let encoded = encode(event)?;
        Ok(Self {
            event_id: EventId::new(),
            aggregate_type: encoded.aggregate_type,
            aggregate_id: encoded.aggregate_id,
            event_type: encoded.event_type.to_string(),
            payload: encoded.payload,
            occurred_at,
            available_at: occurred_at,
            retry_count: 0,
            status: OutboxStatus::Pending,
            published_at: None,
            last_error: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn headers(&self) -> Headers {
        BTreeMap::from([
            ("event-id", self.event_id.to_string()),
            ("event-type", self.event_type.clone()),
            ("aggregate-type", self.aggregate_type.to_string()),
            ("aggregate-id", self.aggregate_id.clone()),
            ("occurred-at", self.occurred_at.to_rfc3339()),
            ("retry-count", self.retry_count.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pairwise_events::{event_types, AllocationFailedPayload, EventError, MAX_PAYLOAD_BYTES};
    use pairwise_id::NationalId;

    fn failed(correlation_id: String) -> AllocationFailedPayload {
        AllocationFailedPayload {
            student_id: NationalId::parse("0499370899").unwrap(),
            reason_code: "NO_ELIGIBLE_MENTOR".to_string(),
            detail_code: Some("CAPACITY_FULL".to_string()),
            correlation_id,
        }
    }

    #[test]
    fn test_from_event_is_pending_and_due() {
        let at = Utc.with_ymd_and_hms(2024, 9, 23, 8, 0, 0).unwrap();
        let message = OutboxMessage::from_event(&failed("c1".into()), at).unwrap();

        assert_eq!(message.status, OutboxStatus::Pending);
        assert_eq!(message.available_at, at);
        assert_eq!(message.retry_count, 0);
        assert_eq!(message.event_type, event_types::ALLOCATION_FAILED);
        assert_eq!(message.aggregate_type, AggregateType::Student);
        assert_eq!(message.aggregate_id, "0499370899");

        let headers = message.headers();
        assert_eq!(headers["event-id"], message.event_id.to_string());
        assert_eq!(headers["retry-count"], "0");
        assert_eq!(headers.len(), 6);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let at = Utc.with_ymd_and_hms(2024, 9, 23, 8, 0, 0).unwrap();
        let err = OutboxMessage::from_event(&failed("x".repeat(MAX_PAYLOAD_BYTES)), at).unwrap_err();
        assert!(matches!(
            err,
            OutboxError::Event(EventError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_status_strings() {
        for status in [OutboxStatus::Pending, OutboxStatus::Sent, OutboxStatus::Failed] {
            assert_eq!(status.as_str().parse::<OutboxStatus>(), Ok(status));
        }
    }
}
