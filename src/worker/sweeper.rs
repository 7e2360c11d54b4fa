use std::time::Duration;

use tokio::sync::watch;

use crate::error::{QueueError, QueueResult};
use crate::queue::RedisQueue;

/// Outcome of one sweep over every indexed job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub jobs_scanned: usize,
    pub items_requeued: usize,
    pub jobs_retired: usize,
}

/// Periodically recovers items whose visibility timeout expired on the
/// shared backend and retires jobs that have finished.
pub struct Sweeper {
    queue: RedisQueue,
    interval: Duration,
}

impl Sweeper {
    pub fn new(queue: RedisQueue, interval: Duration) -> Self {
        Self { queue, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single pass over all indexed jobs
    pub async fn sweep_once(&self) -> QueueResult<SweepReport> {
        let mut report = SweepReport::default();

        for job_id in self.queue.list_jobs().await? {
            report.jobs_scanned += 1;
            report.items_requeued += self.queue.requeue_timed_out_items(&job_id).await?;

            if self.queue.retire_job_if_complete(&job_id).await? {
                report.jobs_retired += 1;
            }
        }

        Ok(report)
    }

    /// Sweep every `interval` until `shutdown` flips to true or the queue closes
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.interval.as_secs(), "Sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let stop_requested = *shutdown.borrow();
            if stop_requested {
                tracing::info!("Shutdown requested, exiting sweeper loop");
                break;
            }

            match self.sweep_once().await {
                Ok(report) => {
                    tracing::debug!(
                        jobs_scanned = report.jobs_scanned,
                        items_requeued = report.items_requeued,
                        jobs_retired = report.jobs_retired,
                        "Sweep finished"
                    );
                }
                Err(QueueError::QueueClosed) => {
                    tracing::info!("Queue closed, exiting sweeper loop");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Sweep failed");
                }
            }
        }
    }
}
