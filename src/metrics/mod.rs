//! Queue metrics recording.
//!
//! [`QueueMetricsRecorder`] is the seam any instrumentation backend implements.
//! [`PrometheusQueueMetrics`] records into a Prometheus registry and
//! [`NoOpQueueMetrics`] discards everything.

pub mod prometheus;

pub use self::prometheus::{export_metrics, PrometheusQueueMetrics};

use std::time::Duration;

use crate::error::QueueError;
use crate::queue::{ItemStatus, JobProgress};

/// Queue operations observed by the metrics decorator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Push,
    Pop,
    Ack,
    Nack,
    Progress,
    GetCompletedItems,
    GetFailedItems,
    Close,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Ack => "ack",
            Self::Nack => "nack",
            Self::Progress => "progress",
            Self::GetCompletedItems => "get_completed_items",
            Self::GetFailedItems => "get_failed_items",
            Self::Close => "close",
        }
    }
}

/// How an operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationOutcome {
    Success,
    /// `pop` found no pending work
    Empty,
    Error,
}

impl OperationOutcome {
    pub fn of<T>(result: &Result<T, QueueError>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(QueueError::QueueEmpty) => Self::Empty,
            Err(_) => Self::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Empty => "empty",
            Self::Error => "error",
        }
    }
}

/// Recorder for queue metrics; shared by every worker, so implementations
/// must tolerate concurrent calls.
pub trait QueueMetricsRecorder: Send + Sync {
    fn record_operation(&self, operation: Operation, duration: Duration, outcome: OperationOutcome);

    /// An item moved out of `from`. `to` is `None` when the destination is not
    /// known to the caller (a nack may retry or fail the item).
    fn record_item_status_change(&self, job_id: &str, from: ItemStatus, to: Option<ItemStatus>);

    fn record_items_pushed(&self, job_id: &str, count: usize);

    /// An item was delivered again after an earlier failed or timed out attempt
    fn record_retry(&self, job_id: &str);

    fn increment_active_jobs(&self);

    fn decrement_active_jobs(&self);

    /// Reconcile per-status item counts from an authoritative snapshot
    fn observe_progress(&self, _job_id: &str, _progress: &JobProgress) {}

    /// Drop every series labelled with a finished job
    fn forget_job(&self, _job_id: &str) {}
}

/// Recorder that drops every measurement
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpQueueMetrics;

impl QueueMetricsRecorder for NoOpQueueMetrics {
    fn record_operation(&self, _: Operation, _: Duration, _: OperationOutcome) {}

    fn record_item_status_change(&self, _: &str, _: ItemStatus, _: Option<ItemStatus>) {}

    fn record_items_pushed(&self, _: &str, _: usize) {}

    fn record_retry(&self, _: &str) {}

    fn increment_active_jobs(&self) {}

    fn decrement_active_jobs(&self) {}

    fn observe_progress(&self, _: &str, _: &JobProgress) {}

    fn forget_job(&self, _: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_of_result() {
        assert_eq!(OperationOutcome::of(&Ok::<_, QueueError>(())), OperationOutcome::Success);
        assert_eq!(
            OperationOutcome::of::<()>(&Err(QueueError::QueueEmpty)),
            OperationOutcome::Empty
        );
        assert_eq!(
            OperationOutcome::of::<()>(&Err(QueueError::JobNotFound)),
            OperationOutcome::Error
        );
    }

    #[test]
    fn test_operation_labels() {
        assert_eq!(Operation::GetCompletedItems.as_str(), "get_completed_items");
        assert_eq!(OperationOutcome::Empty.as_str(), "empty");
    }
}
