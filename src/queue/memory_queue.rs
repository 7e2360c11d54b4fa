use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::{QueueError, QueueResult};
use crate::queue::item::sort_by_completion;
use crate::queue::{ItemStatus, JobProgress, Options, WorkItem, WorkQueue};

/// In-process queue for development, tests and single-replica deployments.
/// One lock guards every job; it is never held across I/O.
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Mutex<InMemoryQueueInner>>,
    closed: Arc<AtomicBool>,
    options: Options,
}

#[derive(Default)]
struct InMemoryQueueInner {
    jobs: HashMap<String, JobState>,
}

#[derive(Default)]
struct JobState {
    pending: VecDeque<String>,
    items: HashMap<String, WorkItem>,
    started_at: Option<OffsetDateTime>,
    completed_at: Option<OffsetDateTime>,
}

impl JobState {
    fn processing_item(&mut self, item_id: &str) -> QueueResult<&mut WorkItem> {
        self.items
            .get_mut(item_id)
            .filter(|item| item.status == ItemStatus::Processing)
            .ok_or(QueueError::ItemNotFound)
    }

    fn is_drained(&self) -> bool {
        self.pending.is_empty()
            && !self
                .items
                .values()
                .any(|item| item.status == ItemStatus::Processing)
    }

    /// Stamp the job's completion the first time it drains
    fn mark_completed_if_drained(&mut self, now: OffsetDateTime) {
        if self.completed_at.is_none() && self.is_drained() {
            self.completed_at = Some(now);
        }
    }

    fn items_with_status(&self, status: ItemStatus) -> Vec<WorkItem> {
        let mut items: Vec<WorkItem> = self
            .items
            .values()
            .filter(|item| item.status == status)
            .cloned()
            .collect();
        sort_by_completion(&mut items);
        items
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            inner: Arc::new(Mutex::new(InMemoryQueueInner::default())),
            closed: Arc::new(AtomicBool::new(false)),
            options,
        }
    }

    pub fn options(&self) -> Options {
        self.options
    }

    fn ensure_open(&self) -> QueueResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::QueueClosed);
        }
        Ok(())
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn push(&self, job_id: &str, items: Vec<WorkItem>) -> QueueResult<()> {
        self.ensure_open()?;
        if items.is_empty() {
            return Ok(());
        }

        let count = items.len();
        let max_attempts = self.options.max_attempts();
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.entry(job_id.to_string()).or_default();
        for mut item in items {
            item.prepare_for_push(job_id, max_attempts);
            job.pending.push_back(item.id.clone());
            job.items.insert(item.id.clone(), item);
        }
        drop(inner);

        tracing::info!(job_id = %job_id, count, "Work items pushed");
        Ok(())
    }

    async fn pop(&self, job_id: &str) -> QueueResult<WorkItem> {
        self.ensure_open()?;
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(job_id).ok_or(QueueError::QueueEmpty)?;

        while let Some(item_id) = job.pending.pop_front() {
            let Some(item) = job.items.get_mut(&item_id) else {
                continue;
            };
            let now = OffsetDateTime::now_utc();
            item.status = ItemStatus::Processing;
            item.attempt += 1;
            item.started_at.get_or_insert(now);
            job.started_at.get_or_insert(now);

            tracing::debug!(job_id = %job_id, item_id = %item.id, attempt = item.attempt, "Work item popped");
            return Ok(item.clone());
        }

        Err(QueueError::QueueEmpty)
    }

    async fn ack(&self, job_id: &str, item_id: &str, result: Option<Vec<u8>>) -> QueueResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(job_id).ok_or(QueueError::JobNotFound)?;
        let now = OffsetDateTime::now_utc();

        let item = job.processing_item(item_id)?;
        item.status = ItemStatus::Completed;
        item.completed_at = Some(now);
        item.result = result.unwrap_or_default();
        job.mark_completed_if_drained(now);

        tracing::debug!(job_id = %job_id, item_id = %item_id, "Work item completed");
        Ok(())
    }

    async fn nack(&self, job_id: &str, item_id: &str, error: Option<&str>) -> QueueResult<()> {
        self.ensure_open()?;
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get_mut(job_id).ok_or(QueueError::JobNotFound)?;
        let now = OffsetDateTime::now_utc();

        let item = job.processing_item(item_id)?;
        item.error = error.unwrap_or_default().to_string();
        let attempt = item.attempt;

        if item.has_attempts_left() {
            // Retried items go to the tail so they don't block the head
            item.status = ItemStatus::Pending;
            job.pending.push_back(item_id.to_string());
            tracing::warn!(job_id = %job_id, item_id = %item_id, attempt, "Work item failed, requeued");
        } else {
            item.status = ItemStatus::Failed;
            item.completed_at = Some(now);
            job.mark_completed_if_drained(now);
            tracing::warn!(job_id = %job_id, item_id = %item_id, attempt, "Work item failed permanently");
        }
        Ok(())
    }

    async fn progress(&self, job_id: &str) -> QueueResult<JobProgress> {
        self.ensure_open()?;
        let inner = self.inner.lock().await;
        let job = inner
            .jobs
            .get(job_id)
            .filter(|job| !job.items.is_empty())
            .ok_or(QueueError::JobNotFound)?;

        let mut progress = JobProgress {
            job_id: job_id.to_string(),
            total: job.items.len() as u64,
            started_at: job.started_at,
            ..Default::default()
        };
        for item in job.items.values() {
            match item.status {
                ItemStatus::Pending => progress.pending += 1,
                ItemStatus::Processing => progress.processing += 1,
                ItemStatus::Completed => progress.completed += 1,
                ItemStatus::Failed => progress.failed += 1,
            }
        }
        if progress.is_complete() {
            progress.completed_at = job.completed_at;
        }
        Ok(progress)
    }

    async fn get_completed_items(&self, job_id: &str) -> QueueResult<Vec<WorkItem>> {
        self.ensure_open()?;
        let inner = self.inner.lock().await;
        let job = inner.jobs.get(job_id).ok_or(QueueError::JobNotFound)?;
        Ok(job.items_with_status(ItemStatus::Completed))
    }

    async fn get_failed_items(&self, job_id: &str) -> QueueResult<Vec<WorkItem>> {
        self.ensure_open()?;
        let inner = self.inner.lock().await;
        let job = inner.jobs.get(job_id).ok_or(QueueError::JobNotFound)?;
        Ok(job.items_with_status(ItemStatus::Failed))
    }

    async fn close(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(QueueError::QueueClosed);
        }
        let mut inner = self.inner.lock().await;
        inner.jobs.clear();
        tracing::info!("In-memory queue closed");
        Ok(())
    }
}
