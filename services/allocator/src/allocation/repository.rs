//! Storage seams for the allocation service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pairwise_id::{AllocationId, MentorId, NationalId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::db::DbError;
use crate::domain::{Mentor, Student};
use crate::error::AllocationError;
use crate::outbox::OutboxMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    Confirmed,
    Cancelled,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Confirmed => "CONFIRMED",
            AllocationStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for AllocationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(AllocationStatus::Confirmed),
            "CANCELLED" => Ok(AllocationStatus::Cancelled),
            other => Err(format!("unknown allocation status: {other}")),
        }
    }
}

/// Where a student stands in the allocation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudentAllocationStatus {
    Pending,
    Assigned,
    NoEligibleMentor,
    Failed,
}

impl StudentAllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StudentAllocationStatus::Pending => "PENDING",
            StudentAllocationStatus::Assigned => "ASSIGNED",
            StudentAllocationStatus::NoEligibleMentor => "NO_ELIGIBLE_MENTOR",
            StudentAllocationStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    pub allocation_id: AllocationId,
    pub allocation_code: String,
    pub year_code: String,
    pub student_id: NationalId,
    pub mentor_id: MentorId,
    pub idempotency_key: String,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An allocation ready to be committed.
#[derive(Debug, Clone)]
pub struct NewAllocation {
    pub allocation_id: AllocationId,
    pub allocation_code: String,
    pub year_code: String,
    pub student_id: NationalId,
    pub mentor_id: MentorId,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

impl NewAllocation {
    pub fn into_record(self) -> AllocationRecord {
        AllocationRecord {
            allocation_id: self.allocation_id,
            allocation_code: self.allocation_code,
            year_code: self.year_code,
            student_id: self.student_id,
            mentor_id: self.mentor_id,
            idempotency_key: self.idempotency_key,
            status: AllocationStatus::Confirmed,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(AllocationRecord),
    /// The idempotency key was already committed; nothing changed.
    Duplicate(AllocationRecord),
}

impl CommitOutcome {
    pub fn record(&self) -> &AllocationRecord {
        match self {
            CommitOutcome::Committed(record) | CommitOutcome::Duplicate(record) => record,
        }
    }
}

/// Hex SHA-256 of `student_id:correlation_id`.
pub fn idempotency_key(student_id: &NationalId, correlation_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(student_id.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(correlation_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
pub trait StudentRepository: Send + Sync {
    /// Students still waiting for a mentor, oldest first.
    async fn list_ready_for_allocation(&self, batch_size: usize) -> Result<Vec<Student>, DbError>;

    async fn mark_assigned(
        &self,
        student_id: &NationalId,
        mentor_id: Option<MentorId>,
        status: StudentAllocationStatus,
    ) -> Result<(), DbError>;
}

#[async_trait]
pub trait MentorRepository: Send + Sync {
    /// Active mentors to run the rule set against.
    async fn find_candidates(&self, student: &Student) -> Result<Vec<Mentor>, DbError>;

    /// Conditional `current_load + 1`. Fails with
    /// [`AllocationError::CapacityExceeded`] when the mentor is full and
    /// [`AllocationError::MentorNotAvailable`] when it is gone.
    async fn increment_load(&self, mentor_id: MentorId) -> Result<(), AllocationError>;
}

#[async_trait]
pub trait AllocationStore: Send + Sync {
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<AllocationRecord>, DbError>;

    /// In one transaction: increment the mentor's load, insert the
    /// allocation, write the student's counter if unset, and enqueue
    /// `events`. A repeated idempotency key changes nothing and returns the
    /// stored record.
    async fn commit(
        &self,
        allocation: NewAllocation,
        events: Vec<OutboxMessage>,
    ) -> Result<CommitOutcome, AllocationError>;
}
