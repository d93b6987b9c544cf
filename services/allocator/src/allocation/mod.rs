//! Allocation service and its storage seams.

mod memory;
mod repository;
mod service;
mod worker;

pub use memory::InMemoryDirectory;
pub use repository::{
    idempotency_key, AllocationRecord, AllocationStatus, AllocationStore, CommitOutcome,
    MentorRepository, NewAllocation, StudentAllocationStatus, StudentRepository,
};
pub use service::{AllocationConfig, AllocationOutcome, AllocationService, BatchReport};
pub use worker::AllocationWorker;
