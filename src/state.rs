use std::sync::Arc;

use prometheus::Registry;

use crate::config::{Config, QueueBackend};
use crate::metrics::{NoOpQueueMetrics, PrometheusQueueMetrics, QueueMetricsRecorder};
use crate::queue::{InMemoryQueue, MeteredQueue, RedisQueue, WorkQueue};

/// Application state shared by the controller-facing code, workers and the sweeper
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Work queue selected at startup (possibly wrapped with metrics)
    pub job_queue: Arc<dyn WorkQueue>,
    /// Raw shared backend, present only for the redis backend (needed by the sweeper)
    pub redis_queue: Option<RedisQueue>,
    /// Registry holding queue metrics when metrics are enabled
    pub metrics_registry: Option<Registry>,
}

impl AppState {
    /// Create a new AppState, connecting to Redis when configured
    pub async fn new(config: Config) -> Result<Self, AppStateError> {
        let options = config.queue_options();

        let (backend, redis_queue): (Arc<dyn WorkQueue>, Option<RedisQueue>) = match config.backend
        {
            QueueBackend::Memory => (Arc::new(InMemoryQueue::with_options(options)), None),
            QueueBackend::Redis => {
                let redis_url = config
                    .redis_url
                    .as_deref()
                    .ok_or(AppStateError::Config("REDIS_URL is required"))?;
                let queue = RedisQueue::connect(redis_url, options)
                    .await
                    .map_err(|e| AppStateError::Redis(e.to_string()))?
                    .with_key_prefix(config.key_prefix.clone());
                (Arc::new(queue.clone()), Some(queue))
            }
        };

        let (recorder, metrics_registry): (Arc<dyn QueueMetricsRecorder>, Option<Registry>) =
            if config.metrics_enabled {
                let registry = Registry::new();
                let metrics = PrometheusQueueMetrics::new(&registry)
                    .map_err(|e| AppStateError::Metrics(e.to_string()))?;
                (Arc::new(metrics), Some(registry))
            } else {
                (Arc::new(NoOpQueueMetrics), None)
            };

        let job_queue: Arc<dyn WorkQueue> = Arc::new(MeteredQueue::new(backend, recorder));

        tracing::info!(
            backend = ?config.backend,
            metrics = config.metrics_enabled,
            "Work queue initialized"
        );

        Ok(Self {
            config,
            job_queue,
            redis_queue,
            metrics_registry,
        })
    }

    /// Create AppState with a custom queue (for testing)
    pub fn with_queue(config: Config, job_queue: Arc<dyn WorkQueue>) -> Self {
        Self {
            config,
            job_queue,
            redis_queue: None,
            metrics_registry: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppStateError {
    #[error("Configuration error: {0}")]
    Config(&'static str),

    #[error("Redis connection error: {0}")]
    Redis(String),

    #[error("Metrics registration error: {0}")]
    Metrics(String),
}
