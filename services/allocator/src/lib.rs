//! pairwise allocator library.
//!
//! This crate ships an `allocator` binary that assigns students to mentors,
//! issues their counters and relays domain events through a transactional
//! outbox. The library surface exists for integration testing and reuse.

pub mod allocation;
pub mod config;
pub mod counter;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod outbox;
