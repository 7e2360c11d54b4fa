pub mod item;
pub mod memory_queue;
pub mod metered;
pub mod redis_queue;
mod scripts;

pub use item::{ItemStatus, JobProgress, WorkItem};
pub use memory_queue::InMemoryQueue;
pub use metered::MeteredQueue;
pub use redis_queue::RedisQueue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

/// Default visibility timeout for items claimed from the shared backend
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default number of delivery attempts per item
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Queue options shared by all backends.
/// `visibility_timeout` only matters to the shared backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub visibility_timeout: Duration,
    pub max_retries: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Options {
    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Attempts granted to each pushed item (never less than one)
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Work queue trait implemented by every backend and by the metrics decorator.
///
/// `pop` never blocks waiting for work: an empty or unknown job yields
/// `QueueError::QueueEmpty` immediately and the caller decides when to poll again.
/// Dropping an operation's future cancels it.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append items to the job's pending sequence, preserving their order
    async fn push(&self, job_id: &str, items: Vec<WorkItem>) -> QueueResult<()>;

    /// Claim the head of the job's pending sequence
    async fn pop(&self, job_id: &str) -> QueueResult<WorkItem>;

    /// Mark a processing item completed and store its result
    async fn ack(&self, job_id: &str, item_id: &str, result: Option<Vec<u8>>) -> QueueResult<()>;

    /// Record a failed attempt; the item is retried while attempts remain
    async fn nack(&self, job_id: &str, item_id: &str, error: Option<&str>) -> QueueResult<()>;

    /// Snapshot of the job's item counts
    async fn progress(&self, job_id: &str) -> QueueResult<JobProgress>;

    async fn get_completed_items(&self, job_id: &str) -> QueueResult<Vec<WorkItem>>;

    async fn get_failed_items(&self, job_id: &str) -> QueueResult<Vec<WorkItem>>;

    /// Release backend resources; every later call fails with `QueueClosed`
    async fn close(&self) -> QueueResult<()>;
}

// Lets a shared `Arc<dyn WorkQueue>` be handed to anything generic over a queue
#[async_trait]
impl<T: WorkQueue + ?Sized> WorkQueue for Arc<T> {
    async fn push(&self, job_id: &str, items: Vec<WorkItem>) -> QueueResult<()> {
        (**self).push(job_id, items).await
    }

    async fn pop(&self, job_id: &str) -> QueueResult<WorkItem> {
        (**self).pop(job_id).await
    }

    async fn ack(&self, job_id: &str, item_id: &str, result: Option<Vec<u8>>) -> QueueResult<()> {
        (**self).ack(job_id, item_id, result).await
    }

    async fn nack(&self, job_id: &str, item_id: &str, error: Option<&str>) -> QueueResult<()> {
        (**self).nack(job_id, item_id, error).await
    }

    async fn progress(&self, job_id: &str) -> QueueResult<JobProgress> {
        (**self).progress(job_id).await
    }

    async fn get_completed_items(&self, job_id: &str) -> QueueResult<Vec<WorkItem>> {
        (**self).get_completed_items(job_id).await
    }

    async fn get_failed_items(&self, job_id: &str) -> QueueResult<Vec<WorkItem>> {
        (**self).get_failed_items(job_id).await
    }

    async fn close(&self) -> QueueResult<()> {
        (**self).close().await
    }
}
