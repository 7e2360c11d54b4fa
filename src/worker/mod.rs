//! Worker-side helpers: the pop → handle → ack/nack loop and the
//! visibility-timeout sweeper.

mod sweeper;

pub use sweeper::{SweepReport, Sweeper};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::watch;

use crate::error::{QueueError, QueueResult};
use crate::queue::{WorkItem, WorkQueue};

/// Executes one work item; `Ok` carries the result payload stored by `ack`
#[async_trait]
pub trait ItemHandler: Send + Sync {
    async fn handle(&self, item: &WorkItem) -> anyhow::Result<Vec<u8>>;
}

/// Counters reported by a finished worker loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub acked: u64,
    pub nacked: u64,
}

impl WorkerStats {
    fn merge(self, other: WorkerStats) -> WorkerStats {
        WorkerStats {
            acked: self.acked + other.acked,
            nacked: self.nacked + other.nacked,
        }
    }
}

/// Drains one job by repeatedly popping and handling items
pub struct Worker<Q, H> {
    queue: Q,
    handler: Arc<H>,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl<Q: WorkQueue, H: ItemHandler> Worker<Q, H> {
    pub fn new(queue: Q, handler: H) -> Self {
        Self {
            queue,
            handler: Arc::new(handler),
            poll_interval: Duration::from_millis(500),
            error_backoff: Duration::from_secs(1),
        }
    }

    /// How long to wait before polling again when the job has nothing pending
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How long to wait after an unexpected queue error
    pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }

    /// Process items of `job_id` until the job is complete, the queue is
    /// closed or `shutdown` flips to true.
    pub async fn run(&self, job_id: &str, mut shutdown: watch::Receiver<bool>) -> QueueResult<WorkerStats> {
        let mut stats = WorkerStats::default();

        loop {
            // Check for shutdown
            let stop_requested = *shutdown.borrow();
            if stop_requested {
                tracing::info!(job_id = %job_id, "Shutdown requested, exiting worker loop");
                break;
            }

            match self.queue.pop(job_id).await {
                Ok(item) => self.process(job_id, item, &mut stats).await?,
                Err(QueueError::QueueEmpty) => {
                    if self.job_finished(job_id).await? {
                        tracing::info!(job_id = %job_id, acked = stats.acked, nacked = stats.nacked, "Job drained");
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        changed = shutdown.changed() => {
                            // A dropped sender counts as shutdown
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(QueueError::QueueClosed) => {
                    tracing::info!(job_id = %job_id, "Queue closed, exiting worker loop");
                    break;
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Error popping work item");
                    // Brief sleep on error to prevent tight loop
                    tokio::time::sleep(self.error_backoff).await;
                }
            }
        }

        Ok(stats)
    }

    /// Run `concurrency` loops over the same job and sum their counters
    pub async fn run_concurrent(
        &self,
        job_id: &str,
        concurrency: usize,
        shutdown: watch::Receiver<bool>,
    ) -> QueueResult<WorkerStats> {
        let loops = (0..concurrency.max(1)).map(|_| self.run(job_id, shutdown.clone()));
        join_all(loops)
            .await
            .into_iter()
            .try_fold(WorkerStats::default(), |total, stats| Ok(total.merge(stats?)))
    }

    async fn process(&self, job_id: &str, item: WorkItem, stats: &mut WorkerStats) -> QueueResult<()> {
        tracing::info!(
            job_id = %job_id,
            item_id = %item.id,
            scenario_id = %item.scenario_id,
            provider_id = %item.provider_id,
            attempt = item.attempt,
            "Processing work item"
        );

        let (outcome, counter) = match self.handler.handle(&item).await {
            Ok(result) => (
                self.queue.ack(job_id, &item.id, Some(result)).await,
                &mut stats.acked,
            ),
            Err(e) => {
                tracing::warn!(job_id = %job_id, item_id = %item.id, error = %e, "Work item handler failed");
                (
                    self.queue.nack(job_id, &item.id, Some(&format!("{:#}", e))).await,
                    &mut stats.nacked,
                )
            }
        };

        match outcome {
            Ok(()) => {
                *counter += 1;
                Ok(())
            }
            // Closed mid-item: the next pop reports it and ends the loop
            Err(QueueError::QueueClosed) => Ok(()),
            // The item was swept back after its visibility timeout; it will be redelivered
            Err(QueueError::ItemNotFound) => {
                tracing::warn!(job_id = %job_id, item_id = %item.id, "Work item no longer claimed, result dropped");
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, item_id = %item.id, error = %e, "Failed to report work item outcome");
                Err(e)
            }
        }
    }

    async fn job_finished(&self, job_id: &str) -> QueueResult<bool> {
        match self.queue.progress(job_id).await {
            Ok(progress) => Ok(progress.is_complete()),
            // Nothing has been pushed yet; keep polling
            Err(QueueError::JobNotFound) => Ok(false),
            Err(QueueError::QueueClosed) => Ok(true),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryQueue, Options};
    use anyhow::anyhow;

    /// Fails every item whose scenario is "flaky"
    struct ScenarioHandler;

    #[async_trait]
    impl ItemHandler for ScenarioHandler {
        async fn handle(&self, item: &WorkItem) -> anyhow::Result<Vec<u8>> {
            if item.scenario_id == "flaky" {
                return Err(anyhow!("provider timed out"));
            }
            Ok(format!("{}:{}:ok", item.scenario_id, item.provider_id).into_bytes())
        }
    }

    fn batch(job_id: &str, scenarios: &[&str]) -> Vec<WorkItem> {
        scenarios
            .iter()
            .map(|scenario| WorkItem::new(job_id, *scenario, "provider"))
            .collect()
    }

    #[tokio::test]
    async fn test_worker_drains_job() {
        let queue = Arc::new(InMemoryQueue::with_options(Options::default().with_max_retries(2)));
        queue
            .push("job-1", batch("job-1", &["greeting", "flaky", "refund"]))
            .await
            .unwrap();

        let (_tx, rx) = watch::channel(false);
        let worker = Worker::new(queue.clone(), ScenarioHandler).with_poll_interval(Duration::from_millis(10));
        let stats = worker.run("job-1", rx).await.unwrap();

        assert_eq!(stats, WorkerStats { acked: 2, nacked: 2 });

        let progress = queue.progress("job-1").await.unwrap();
        assert!(progress.is_complete());
        assert_eq!(progress.completed, 2);
        assert_eq!(progress.failed, 1);

        let failed = queue.get_failed_items("job-1").await.unwrap();
        assert_eq!(failed[0].error, "provider timed out");
        let completed = queue.get_completed_items("job-1").await.unwrap();
        assert!(completed.iter().all(|item| item.result.ends_with(b":ok")));
    }

    #[tokio::test]
    async fn test_concurrent_workers_ack_each_item_once() {
        let queue = Arc::new(InMemoryQueue::new());
        let scenarios: Vec<String> = (0..50).map(|i| format!("scenario-{}", i)).collect();
        let refs: Vec<&str> = scenarios.iter().map(String::as_str).collect();
        queue.push("job-1", batch("job-1", &refs)).await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let worker = Worker::new(queue.clone(), ScenarioHandler).with_poll_interval(Duration::from_millis(5));
        let stats = worker.run_concurrent("job-1", 8, rx).await.unwrap();

        assert_eq!(stats.acked, 50);
        assert_eq!(stats.nacked, 0);
        assert_eq!(queue.progress("job-1").await.unwrap().completed, 50);
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let queue = Arc::new(InMemoryQueue::new());
        let (tx, rx) = watch::channel(false);
        let worker = Worker::new(queue, ScenarioHandler).with_poll_interval(Duration::from_secs(60));

        let handle = tokio::spawn(async move { worker.run("job-unknown", rx).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop promptly")
            .unwrap()
            .unwrap();
        assert_eq!(stats, WorkerStats::default());
    }

    /// Acks every item itself before returning, as if a redelivered copy
    /// had already been finished elsewhere
    struct RacingHandler {
        queue: Arc<InMemoryQueue>,
    }

    #[async_trait]
    impl ItemHandler for RacingHandler {
        async fn handle(&self, item: &WorkItem) -> anyhow::Result<Vec<u8>> {
            self.queue.ack(&item.job_id, &item.id, None).await?;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_rejected_ack_is_not_counted() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.push("job-1", batch("job-1", &["a", "b"])).await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let handler = RacingHandler {
            queue: queue.clone(),
        };
        let worker = Worker::new(queue.clone(), handler).with_poll_interval(Duration::from_millis(10));
        let stats = worker.run("job-1", rx).await.unwrap();

        assert_eq!(stats, WorkerStats::default());
        assert_eq!(queue.progress("job-1").await.unwrap().completed, 2);
    }

    #[tokio::test]
    async fn test_worker_exits_when_queue_closed() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.push("job-1", batch("job-1", &["a"])).await.unwrap();
        queue.close().await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let stats = Worker::new(queue, ScenarioHandler).run("job-1", rx).await.unwrap();
        assert_eq!(stats, WorkerStats::default());
    }
}
