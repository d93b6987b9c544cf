//! # pairwise-events
//!
//! Domain events emitted by the allocation core through the transactional
//! outbox.
//!
//! ## Design Principles
//!
//! - Events are immutable records of committed state transitions
//! - Every event belongs to exactly one aggregate
//! - Event type names are stable strings (`allocation.created`)
//! - Encoded payloads are size-bounded so a single row can never exceed the
//!   outbox column budget
//!
//! ## Event Types
//!
//! - Allocation events (`allocation.*`)

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
