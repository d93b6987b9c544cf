//! Allocation background worker.
//!
//! Runs allocation batches on a periodic interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use super::AllocationService;

pub struct AllocationWorker {
    service: Arc<AllocationService>,
    interval: Duration,
    batch_size: usize,
}

impl AllocationWorker {
    pub fn new(service: Arc<AllocationService>, interval: Duration, batch_size: usize) -> Self {
        Self {
            service,
            interval,
            batch_size,
        }
    }

    /// Run the allocation worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Starting allocation worker"
        );

        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.service.run_batch(self.batch_size).await {
                        error!(code = e.code(), error = %e, "Allocation batch failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Allocation worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
