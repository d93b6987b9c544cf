//! Allocation error kinds.
//!
//! Every variant carries a stable machine code and a Persian message for
//! operators and downstream consumers.

use pairwise_events::EventError;
use pairwise_id::{IdError, MentorId};
use thiserror::Error;

use crate::counter::CounterError;
use crate::db::DbError;
use crate::engine::SelectionResult;
use crate::outbox::OutboxError;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("mentor {mentor_id} has no remaining capacity")]
    CapacityExceeded { mentor_id: MentorId },

    #[error("invalid student data: {0}")]
    InvalidStudentData(String),

    #[error("no eligible mentor for student {student_id}")]
    NoEligibleMentor {
        student_id: String,
        selection: Box<SelectionResult>,
    },

    #[error("mentor {mentor_id} is not available")]
    MentorNotAvailable { mentor_id: MentorId },

    #[error("counter generation failed: {0}")]
    CounterGenerationFailed(String),

    #[error("counter bucket {bucket} is exhausted")]
    CounterExhausted { bucket: String },

    #[error("counter reservation {request_key} timed out")]
    ReservationTimeout { request_key: String },

    #[error("allocation kept conflicting after {attempts} attempts")]
    ConcurrencyConflict { attempts: u32 },

    #[error("issued counter {counter} violates the canonical format")]
    CounterFormatInvariant { counter: String },

    #[error("event payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Storage(#[from] DbError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AllocationError {
    pub fn code(&self) -> &'static str {
        match self {
            AllocationError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            AllocationError::InvalidStudentData(_) => "INVALID_STUDENT_DATA",
            AllocationError::NoEligibleMentor { .. } => "NO_ELIGIBLE_MENTOR",
            AllocationError::MentorNotAvailable { .. } => "MENTOR_NOT_AVAILABLE",
            AllocationError::CounterGenerationFailed(_) => "COUNTER_GENERATION_FAILED",
            AllocationError::CounterExhausted { .. } => "COUNTER_EXHAUSTED",
            AllocationError::ReservationTimeout { .. } => "RESERVATION_TIMEOUT",
            AllocationError::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            AllocationError::CounterFormatInvariant { .. } => "COUNTER_FORMAT_INVARIANT",
            AllocationError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            AllocationError::Storage(_) => "STORAGE_ERROR",
            AllocationError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn localized_message(&self) -> &'static str {
        match self {
            AllocationError::CapacityExceeded { .. } => "ظرفیت پشتیبان تکمیل شده است",
            AllocationError::InvalidStudentData(_) => "اطلاعات دانش‌آموز نامعتبر است",
            AllocationError::NoEligibleMentor { .. } => "هیچ پشتیبان واجد شرایطی یافت نشد",
            AllocationError::MentorNotAvailable { .. } => "پشتیبان در دسترس نیست",
            AllocationError::CounterGenerationFailed(_) => "تولید شمارنده با خطا مواجه شد",
            AllocationError::CounterExhausted { .. } => "ظرفیت شمارنده برای این سال و جنسیت به پایان رسیده است",
            AllocationError::ReservationTimeout { .. } => "مهلت رزرو شمارنده به پایان رسید",
            AllocationError::ConcurrencyConflict { .. } => "تداخل هم‌زمانی؛ لطفاً دوباره تلاش کنید",
            AllocationError::CounterFormatInvariant { .. } => "قالب شمارنده صادرشده نامعتبر است",
            AllocationError::PayloadTooLarge { .. } => "حجم رویداد بیش از حد مجاز است",
            AllocationError::Storage(_) => "خطای ذخیره‌سازی",
            AllocationError::Internal(_) => "خطای داخلی سامانه",
        }
    }

    /// Only a lost capacity race is worth re-running selection for.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocationError::CapacityExceeded { .. })
    }

    /// Failures that say nothing about the student and may clear on their own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AllocationError::Storage(_)
                | AllocationError::ReservationTimeout { .. }
                | AllocationError::ConcurrencyConflict { .. }
        )
    }
}

impl From<IdError> for AllocationError {
    fn from(e: IdError) -> Self {
        AllocationError::InvalidStudentData(e.to_string())
    }
}

impl From<CounterError> for AllocationError {
    fn from(e: CounterError) -> Self {
        match e {
            CounterError::Exhausted { bucket } => AllocationError::CounterExhausted { bucket },
            CounterError::ReservationTimeout { request_key, .. } => {
                AllocationError::ReservationTimeout { request_key }
            }
            CounterError::FormatInvariant { counter } => {
                AllocationError::CounterFormatInvariant { counter }
            }
            CounterError::InvalidCounter(counter) => AllocationError::InvalidStudentData(format!(
                "existing counter {counter} is malformed"
            )),
            e @ CounterError::ReservationLost { .. } => {
                AllocationError::CounterGenerationFailed(e.to_string())
            }
            CounterError::Storage(db) => AllocationError::Storage(db),
        }
    }
}

impl From<OutboxError> for AllocationError {
    fn from(e: OutboxError) -> Self {
        match e {
            OutboxError::Event(EventError::PayloadTooLarge { size, limit }) => {
                AllocationError::PayloadTooLarge { size, limit }
            }
            OutboxError::Storage(db) => AllocationError::Storage(db),
            other => AllocationError::Internal(other.to_string()),
        }
    }
}
