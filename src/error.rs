/// Queue error type shared by every backend and the metrics decorator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// No pending work for the job right now (expected, non-fatal)
    #[error("queue is empty")]
    QueueEmpty,

    #[error("work item not found")]
    ItemNotFound,

    #[error("job not found")]
    JobNotFound,

    #[error("queue is closed")]
    QueueClosed,

    // Transport errors from the shared backend, surfaced as-is
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Corrupt item record: {0}")]
    CorruptRecord(String),
}

impl QueueError {
    /// True for the "no work right now" signal returned by `pop`
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::QueueEmpty)
    }

    /// True for caller errors referencing an unknown job or item
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ItemNotFound | Self::JobNotFound)
    }
}

// Convenient conversions from common error types

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Redis(err.to_string())
    }
}

impl From<time::error::Format> for QueueError {
    fn from(err: time::error::Format) -> Self {
        QueueError::CorruptRecord(format!("timestamp format: {}", err))
    }
}

impl From<time::error::Parse> for QueueError {
    fn from(err: time::error::Parse) -> Self {
        QueueError::CorruptRecord(format!("timestamp parse: {}", err))
    }
}

/// Result type alias for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
