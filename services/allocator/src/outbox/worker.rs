//! Outbox background worker.
//!
//! Runs the dispatcher loop until shutdown is signaled.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, instrument};

use super::OutboxDispatcher;

pub struct OutboxWorker {
    dispatcher: OutboxDispatcher,
    poll_interval: Duration,
    once: bool,
}

impl OutboxWorker {
    pub fn new(dispatcher: OutboxDispatcher, poll_interval: Duration, once: bool) -> Self {
        Self {
            dispatcher,
            poll_interval,
            once,
        }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(
            poll_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.dispatcher.config().batch_size,
            once = self.once,
            "Starting outbox worker"
        );

        let published = self
            .dispatcher
            .run_loop(self.once, self.poll_interval, shutdown)
            .await;

        info!(published, "Outbox worker shutting down");
    }
}
