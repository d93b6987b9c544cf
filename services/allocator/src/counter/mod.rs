//! Counter issuance.
//!
//! Each successful allocation gets a nine-character counter drawn from a
//! per-(year, gender) sequence. Reservation is idempotent per request key:
//! a retry of the same request replays the confirmed sequence, and a
//! concurrent duplicate waits for the first one to confirm.

mod format;
mod memory;
mod service;
mod store;

pub use format::{
    gender_prefix, is_valid_counter, year_code, CounterBucket, CounterRecord, COUNTER_LEN,
    COUNTER_PATTERN, MAX_SEQUENCE,
};
pub use memory::InMemorySequenceStore;
pub use service::{SequenceConfig, SequenceService};
pub use store::{ReserveOutcome, SequenceStore};

use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter bucket {bucket} is exhausted")]
    Exhausted { bucket: String },

    #[error("reservation {request_key} still pending after {attempts} waits")]
    ReservationTimeout { request_key: String, attempts: u32 },

    #[error("reservation {request_key} in bucket {bucket} was lost before confirmation")]
    ReservationLost { bucket: String, request_key: String },

    #[error("issued counter {counter} violates the canonical format")]
    FormatInvariant { counter: String },

    #[error("invalid counter: {0}")]
    InvalidCounter(String),

    #[error(transparent)]
    Storage(#[from] DbError),
}
