//! The claimer tick: periodically claims due/stale outbox rows and fans
//! each one out to the processor.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::OutboxRepository;
use crate::processor::Processor;

pub struct Scheduler {
    repo: OutboxRepository,
    processor: Arc<Processor>,
    tick_interval: Duration,
    batch_size: i64,
    stale_lease: Duration,
}

impl Scheduler {
    pub fn new(
        repo: OutboxRepository,
        processor: Arc<Processor>,
        tick_interval: Duration,
        batch_size: i64,
        stale_lease: Duration,
    ) -> Self {
        Self {
            repo,
            processor,
            tick_interval,
            batch_size,
            stale_lease,
        }
    }

    /// Run the tick loop until `shutdown` is cancelled, draining any
    /// in-flight processing tasks before returning.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler received shutdown signal, draining in-flight work");
                    break;
                }
                _ = interval.tick() => {
                    match self.repo.claim_pending_batch(self.batch_size, self.stale_lease).await {
                        Ok(claimed) if claimed.is_empty() => {}
                        Ok(claimed) => {
                            info!(count = claimed.len(), "claimed outbox rows");
                            for msg in claimed {
                                let processor = self.processor.clone();
                                tasks.spawn(async move {
                                    processor.process(msg.id).await;
                                });
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "failed to claim pending batch");
                        }
                    }
                }
                Some(res) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = res {
                        error!(error = %e, "processing task panicked");
                    }
                }
            }
        }

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "processing task panicked during drain");
            }
        }
    }
}
