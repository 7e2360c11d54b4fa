use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Work item status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Item is waiting in the job's pending sequence
    Pending,
    /// Item has been popped by a worker
    Processing,
    /// Item was acked
    Completed,
    /// Item exhausted its attempts
    Failed,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 4] = [
        Self::Pending,
        Self::Processing,
        Self::Completed,
        Self::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }
}

/// One unit of evaluation work: one scenario run against one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique item identifier (unique across all jobs)
    pub id: String,

    /// Owning job
    pub job_id: String,

    pub scenario_id: String,
    pub provider_id: String,

    /// Resolved bundle location, opaque to the queue
    pub bundle_url: String,

    /// Opaque configuration bytes
    pub config: Vec<u8>,

    /// Current status
    pub status: ItemStatus,

    /// Delivery counter, incremented on every pop
    pub attempt: u32,
    pub max_attempts: u32,

    /// Timestamps
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,

    /// Last failure reason
    pub error: String,

    /// Opaque success payload
    pub result: Vec<u8>,
}

impl WorkItem {
    pub fn new(
        job_id: impl Into<String>,
        scenario_id: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            scenario_id: scenario_id.into(),
            provider_id: provider_id.into(),
            bundle_url: String::new(),
            config: Vec::new(),
            status: ItemStatus::Pending,
            attempt: 0,
            max_attempts: 0,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
            error: String::new(),
            result: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_bundle_url(mut self, bundle_url: impl Into<String>) -> Self {
        self.bundle_url = bundle_url.into();
        self
    }

    pub fn with_config(mut self, config: impl Into<Vec<u8>>) -> Self {
        self.config = config.into();
        self
    }

    /// Reset queue-owned fields as `push` does before storing the item
    pub(crate) fn prepare_for_push(&mut self, job_id: &str, max_attempts: u32) {
        self.job_id = job_id.to_string();
        self.status = ItemStatus::Pending;
        self.attempt = 0;
        self.max_attempts = max_attempts;
        self.started_at = None;
        self.completed_at = None;
        self.error.clear();
        self.result.clear();
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

/// Progress summary computed over one job's items
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: String,
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    /// First pop across all items
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// First time the job drained; only reported while it is complete
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl JobProgress {
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.processing == 0
    }

    /// Percentage of finished items that completed successfully
    pub fn success_rate(&self) -> f64 {
        let finished = self.completed + self.failed;
        if finished == 0 {
            return 0.0;
        }
        self.completed as f64 / finished as f64 * 100.0
    }

    pub fn count(&self, status: ItemStatus) -> u64 {
        match status {
            ItemStatus::Pending => self.pending,
            ItemStatus::Processing => self.processing,
            ItemStatus::Completed => self.completed,
            ItemStatus::Failed => self.failed,
        }
    }
}

/// Order terminal items by completion time, ties broken by ID
pub(crate) fn sort_by_completion(items: &mut [WorkItem]) {
    items.sort_by(|a, b| {
        a.completed_at
            .cmp(&b.completed_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
