use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::QueueResult;
use crate::metrics::{NoOpQueueMetrics, Operation, OperationOutcome, QueueMetricsRecorder};
use crate::queue::{ItemStatus, JobProgress, WorkItem, WorkQueue};

/// Decorator that records metrics around any [`WorkQueue`].
///
/// Every call is forwarded unchanged and its result returned as-is. A nack's
/// destination (retry or failure) is not visible here, so it is recorded as
/// "left processing" and the per-status gauges are reconciled on the next
/// `progress` call. Once a snapshot shows a job complete, its labelled series
/// are dropped.
pub struct MeteredQueue<Q> {
    inner: Q,
    recorder: Arc<dyn QueueMetricsRecorder>,
    active_jobs: Mutex<HashSet<String>>,
}

impl<Q: WorkQueue> MeteredQueue<Q> {
    pub fn new(inner: Q, recorder: Arc<dyn QueueMetricsRecorder>) -> Self {
        Self {
            inner,
            recorder,
            active_jobs: Mutex::new(HashSet::new()),
        }
    }

    /// Wrap without recording anything
    pub fn unmetered(inner: Q) -> Self {
        Self::new(inner, Arc::new(NoOpQueueMetrics))
    }

    pub fn inner(&self) -> &Q {
        &self.inner
    }

    fn record<T>(&self, operation: Operation, started: Instant, result: &QueueResult<T>) {
        self.recorder
            .record_operation(operation, started.elapsed(), OperationOutcome::of(result));
    }

    fn activate_job(&self, job_id: &str) {
        let newly_active = match self.active_jobs.lock() {
            Ok(mut active) => active.insert(job_id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(job_id.to_string()),
        };
        if newly_active {
            self.recorder.increment_active_jobs();
        }
    }

    fn finish_job(&self, job_id: &str) {
        let was_active = match self.active_jobs.lock() {
            Ok(mut active) => active.remove(job_id),
            Err(poisoned) => poisoned.into_inner().remove(job_id),
        };
        if was_active {
            self.recorder.decrement_active_jobs();
        }
        // Worker-side decorators never see the push, so forget regardless
        self.recorder.forget_job(job_id);
    }
}

#[async_trait]
impl<Q: WorkQueue> WorkQueue for MeteredQueue<Q> {
    async fn push(&self, job_id: &str, items: Vec<WorkItem>) -> QueueResult<()> {
        let count = items.len();
        let started = Instant::now();
        let result = self.inner.push(job_id, items).await;
        self.record(Operation::Push, started, &result);

        if result.is_ok() && count > 0 {
            self.recorder.record_items_pushed(job_id, count);
            self.activate_job(job_id);
        }
        result
    }

    async fn pop(&self, job_id: &str) -> QueueResult<WorkItem> {
        let started = Instant::now();
        let result = self.inner.pop(job_id).await;
        self.record(Operation::Pop, started, &result);

        if let Ok(item) = &result {
            self.recorder.record_item_status_change(
                job_id,
                ItemStatus::Pending,
                Some(ItemStatus::Processing),
            );
            if item.attempt > 1 {
                self.recorder.record_retry(job_id);
            }
        }
        result
    }

    async fn ack(&self, job_id: &str, item_id: &str, result: Option<Vec<u8>>) -> QueueResult<()> {
        let started = Instant::now();
        let outcome = self.inner.ack(job_id, item_id, result).await;
        self.record(Operation::Ack, started, &outcome);

        if outcome.is_ok() {
            self.recorder.record_item_status_change(
                job_id,
                ItemStatus::Processing,
                Some(ItemStatus::Completed),
            );
        }
        outcome
    }

    async fn nack(&self, job_id: &str, item_id: &str, error: Option<&str>) -> QueueResult<()> {
        let started = Instant::now();
        let outcome = self.inner.nack(job_id, item_id, error).await;
        self.record(Operation::Nack, started, &outcome);

        if outcome.is_ok() {
            self.recorder
                .record_item_status_change(job_id, ItemStatus::Processing, None);
        }
        outcome
    }

    async fn progress(&self, job_id: &str) -> QueueResult<JobProgress> {
        let started = Instant::now();
        let result = self.inner.progress(job_id).await;
        self.record(Operation::Progress, started, &result);

        if let Ok(progress) = &result {
            if progress.is_complete() {
                self.finish_job(job_id);
            } else {
                self.recorder.observe_progress(job_id, progress);
            }
        }
        result
    }

    async fn get_completed_items(&self, job_id: &str) -> QueueResult<Vec<WorkItem>> {
        let started = Instant::now();
        let result = self.inner.get_completed_items(job_id).await;
        self.record(Operation::GetCompletedItems, started, &result);
        result
    }

    async fn get_failed_items(&self, job_id: &str) -> QueueResult<Vec<WorkItem>> {
        let started = Instant::now();
        let result = self.inner.get_failed_items(job_id).await;
        self.record(Operation::GetFailedItems, started, &result);
        result
    }

    async fn close(&self) -> QueueResult<()> {
        let started = Instant::now();
        let result = self.inner.close().await;
        self.record(Operation::Close, started, &result);
        result
    }
}
