use arena_queue::queue::WorkItem;
use uuid::Uuid;

/// Factory for creating test work items
pub struct Factory {
    job_id: String,
}

#[allow(dead_code)]
impl Factory {
    /// Factory for a fresh, uniquely named job
    pub fn new() -> Self {
        Self {
            job_id: format!("job-{}", Uuid::new_v4()),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// One item with a realistic bundle and config payload
    pub fn item(&self, scenario_id: &str) -> WorkItem {
        WorkItem::new(&self.job_id, scenario_id, "openai-gpt")
            .with_bundle_url(format!("s3://arena-bundles/{}.tar.gz", scenario_id))
            .with_config(format!(r#"{{"scenario":"{}","turns":4}}"#, scenario_id))
    }

    /// `count` items named scenario-0 .. scenario-{count-1}
    pub fn items(&self, count: usize) -> Vec<WorkItem> {
        (0..count)
            .map(|i| self.item(&format!("scenario-{}", i)))
            .collect()
    }
}
