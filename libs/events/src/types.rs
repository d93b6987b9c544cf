//! Event type definitions for allocation events.

use pairwise_id::{AllocationId, MentorId, NationalId};
use serde::{Deserialize, Serialize};

use crate::{AggregateType, OutboxEvent};

// =============================================================================
// Event Type Constants
// =============================================================================

/// All event type names as constants.
pub mod event_types {
    pub const ALLOCATION_CREATED: &str = "allocation.created";
    pub const ALLOCATION_FAILED: &str = "allocation.failed";
}

// =============================================================================
// Allocation Events
// =============================================================================

/// A student was assigned to a mentor and received an allocation code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationCreatedPayload {
    pub allocation_id: AllocationId,
    pub allocation_code: String,
    pub year_code: String,
    pub student_id: NationalId,
    pub mentor_id: MentorId,
    pub fairness_strategy: String,
    pub fairness_key: String,
    pub correlation_id: String,
}

impl OutboxEvent for AllocationCreatedPayload {
    fn event_type() -> &'static str {
        event_types::ALLOCATION_CREATED
    }

    fn aggregate_type() -> AggregateType {
        AggregateType::Allocation
    }

    fn aggregate_id(&self) -> String {
        self.allocation_id.to_string()
    }
}

/// No mentor could be selected for a student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationFailedPayload {
    pub student_id: NationalId,
    pub reason_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_code: Option<String>,
    pub correlation_id: String,
}

impl OutboxEvent for AllocationFailedPayload {
    fn event_type() -> &'static str {
        event_types::ALLOCATION_FAILED
    }

    fn aggregate_type() -> AggregateType {
        AggregateType::Student
    }

    fn aggregate_id(&self) -> String {
        self.student_id.to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
