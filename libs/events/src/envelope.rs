//! Aggregate routing and payload encoding shared by all outbox events.

use serde::{Deserialize, Serialize};

use crate::EventError;

/// Upper bound on the serialized payload of a single outbox event.
pub const MAX_PAYLOAD_BYTES: usize = 32 * 1024;

/// Aggregate type for event routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateType {
    Allocation,
    Student,
    Mentor,
}

impl AggregateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateType::Allocation => "allocation",
            AggregateType::Student => "student",
            AggregateType::Mentor => "mentor",
        }
    }
}

impl std::fmt::Display for AggregateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AggregateType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allocation" => Ok(AggregateType::Allocation),
            "student" => Ok(AggregateType::Student),
            "mentor" => Ok(AggregateType::Mentor),
            other => Err(EventError::UnknownAggregateType(other.to_string())),
        }
    }
}

/// An event that can be written to the transactional outbox.
pub trait OutboxEvent: Serialize {
    /// Stable event type name, e.g. `"allocation.created"`.
    fn event_type() -> &'static str;

    /// Aggregate the event belongs to.
    fn aggregate_type() -> AggregateType;

    /// Identifier of the aggregate instance.
    fn aggregate_id(&self) -> String;
}

/// An event serialized and checked against [`MAX_PAYLOAD_BYTES`].
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedEvent {
    pub event_type: &'static str,
    pub aggregate_type: AggregateType,
    pub aggregate_id: String,
    pub payload: serde_json::Value,
    pub encoded_len: usize,
}

/// Serializes an event, rejecting payloads over the size budget.
pub fn encode<E: OutboxEvent>(event: &E) -> Result<EncodedEvent, EventError> {
    let bytes = serde_json::to_vec(event)?;
    if bytes.len() > MAX_PAYLOAD_BYTES {
        return Err(EventError::PayloadTooLarge {
            size: bytes.len(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }
    let payload = serde_json::from_slice(&bytes)?;

    Ok(EncodedEvent {
        event_type: E::event_type(),
        aggregate_type: E::aggregate_type(),
        aggregate_id: event.aggregate_id(),
        payload,
        encoded_len: bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Blob {
        id: String,
        body: String,
    }

    impl OutboxEvent for Blob {
        fn event_type() -> &'static str {
            "test.blob"
        }

        fn aggregate_type() -> AggregateType {
            AggregateType::Mentor
        }

        fn aggregate_id(&self) -> String {
            self.id.clone()
        }
    }

    #[test]
    fn test_aggregate_type_roundtrip() {
        for agg in [
            AggregateType::Allocation,
            AggregateType::Student,
            AggregateType::Mentor,
        ] {
            assert_eq!(agg.to_string().parse::<AggregateType>().unwrap(), agg);
        }
        assert!("org".parse::<AggregateType>().is_err());
    }

    #[test]
    fn test_encode_small_payload() {
        let encoded = encode(&Blob {
            id: "m-1".to_string(),
            body: "hello".to_string(),
        })
        .unwrap();
        assert_eq!(encoded.event_type, "test.blob");
        assert_eq!(encoded.aggregate_id, "m-1");
        assert_eq!(encoded.payload["body"], "hello");
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let err = encode(&Blob {
            id: "m-1".to_string(),
            body: "x".repeat(MAX_PAYLOAD_BYTES),
        })
        .unwrap_err();
        assert!(matches!(
            err,
            EventError::PayloadTooLarge {
                limit: MAX_PAYLOAD_BYTES,
                ..
            }
        ));
    }
}
