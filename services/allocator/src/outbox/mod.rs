//! Transactional outbox.
//!
//! Domain events are written in the same transaction as the state change
//! that produced them, then delivered asynchronously by the dispatcher with
//! at-least-once semantics.

mod dispatcher;
mod memory;
mod message;
mod publisher;
mod store;
mod worker;

pub use dispatcher::{DispatcherConfig, OutboxDispatcher, SweepStats};
pub use memory::InMemoryOutboxStore;
pub use message::{Headers, OutboxMessage, OutboxStatus};
pub use publisher::{LogPublisher, PublishError, Publisher, WebhookPublisher, PUBLISH_TIMEOUT};
pub use store::OutboxStore;
pub use worker::OutboxWorker;

use pairwise_events::EventError;
use pairwise_id::EventId;
use thiserror::Error;

use crate::db::DbError;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error(transparent)]
    Event(#[from] EventError),

    #[error("outbox event {0} already exists")]
    DuplicateEvent(EventId),

    #[error(transparent)]
    Storage(#[from] DbError),
}
