//! # pairwise-id
//!
//! Identifier types for the pairwise allocation core.
//!
//! ## ID Families
//!
//! - **ULID-backed, prefixed** (`{prefix}_{ulid}`): identifiers minted by the
//!   core itself, such as allocations (`alloc_…`) and outbox events (`evt_…`).
//!   They sort by creation time and parse strictly.
//! - **Numeric**: [`MentorId`], owned by the upstream mentor registry.
//! - **Externally assigned**: [`NationalId`], the student's 10-digit national
//!   code, validated with its check digit on parse.
//!
//! Examples:
//! - `alloc_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `evt_01HV4Z3MXNKPQR9HSTZ7WCLD4E`

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
