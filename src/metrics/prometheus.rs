//! Prometheus-backed queue metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

use super::{Operation, OperationOutcome, QueueMetricsRecorder};
use crate::queue::{ItemStatus, JobProgress};

/// Queue metrics registered on a caller-supplied registry.
///
/// - `arena_queue_operations_total{operation, outcome}`
/// - `arena_queue_operation_duration_seconds{operation}`
/// - `arena_queue_items{job_id, status}`
/// - `arena_queue_items_pushed_total{job_id}`
/// - `arena_queue_retries_total{job_id}`
/// - `arena_queue_active_jobs`
#[derive(Clone)]
pub struct PrometheusQueueMetrics {
    operations_total: CounterVec,
    operation_duration: HistogramVec,
    items: GaugeVec,
    items_pushed_total: CounterVec,
    retries_total: CounterVec,
    active_jobs: Gauge,
}

impl PrometheusQueueMetrics {
    /// Create the metrics and register them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns a `prometheus::Error` if a metric with the same name is already
    /// registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let operations_total = CounterVec::new(
            Opts::new("arena_queue_operations_total", "Total queue operations"),
            &["operation", "outcome"],
        )?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "arena_queue_operation_duration_seconds",
                "Queue operation duration in seconds",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;

        let items = GaugeVec::new(
            Opts::new("arena_queue_items", "Work items by job and status"),
            &["job_id", "status"],
        )?;

        let items_pushed_total = CounterVec::new(
            Opts::new("arena_queue_items_pushed_total", "Total work items pushed"),
            &["job_id"],
        )?;

        let retries_total = CounterVec::new(
            Opts::new("arena_queue_retries_total", "Total work item redeliveries"),
            &["job_id"],
        )?;

        let active_jobs = Gauge::new("arena_queue_active_jobs", "Jobs with unfinished work")?;

        registry.register(Box::new(operations_total.clone()))?;
        registry.register(Box::new(operation_duration.clone()))?;
        registry.register(Box::new(items.clone()))?;
        registry.register(Box::new(items_pushed_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(active_jobs.clone()))?;

        tracing::debug!("Queue metrics registered");

        Ok(Self {
            operations_total,
            operation_duration,
            items,
            items_pushed_total,
            retries_total,
            active_jobs,
        })
    }

    fn item_gauge(&self, job_id: &str, status: ItemStatus) -> Gauge {
        self.items.with_label_values(&[job_id, status.as_str()])
    }
}

impl QueueMetricsRecorder for PrometheusQueueMetrics {
    fn record_operation(&self, operation: Operation, duration: Duration, outcome: OperationOutcome) {
        self.operations_total
            .with_label_values(&[operation.as_str(), outcome.as_str()])
            .inc();
        self.operation_duration
            .with_label_values(&[operation.as_str()])
            .observe(duration.as_secs_f64());
    }

    fn record_item_status_change(&self, job_id: &str, from: ItemStatus, to: Option<ItemStatus>) {
        self.item_gauge(job_id, from).dec();
        if let Some(to) = to {
            self.item_gauge(job_id, to).inc();
        }
    }

    fn record_items_pushed(&self, job_id: &str, count: usize) {
        self.items_pushed_total
            .with_label_values(&[job_id])
            .inc_by(count as f64);
        self.item_gauge(job_id, ItemStatus::Pending)
            .add(count as f64);
    }

    fn record_retry(&self, job_id: &str) {
        self.retries_total.with_label_values(&[job_id]).inc();
    }

    fn increment_active_jobs(&self) {
        self.active_jobs.inc();
    }

    fn decrement_active_jobs(&self) {
        self.active_jobs.dec();
    }

    fn observe_progress(&self, job_id: &str, progress: &JobProgress) {
        for status in ItemStatus::ALL {
            self.item_gauge(job_id, status)
                .set(progress.count(status) as f64);
        }
    }

    fn forget_job(&self, job_id: &str) {
        // Series that were never created report an error; nothing to remove then
        for status in ItemStatus::ALL {
            let _ = self.items.remove_label_values(&[job_id, status.as_str()]);
        }
        let _ = self.items_pushed_total.remove_label_values(&[job_id]);
        let _ = self.retries_total.remove_label_values(&[job_id]);
    }
}

/// Render every metric in `registry` in the Prometheus text format
pub fn export_metrics(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer).unwrap_or_else(|e| format!("# Error converting metrics: {}\n", e))
}
