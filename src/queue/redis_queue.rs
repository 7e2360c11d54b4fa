use async_trait::async_trait;
use redis::aio::ConnectionManager as RedisConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{QueueError, QueueResult};
use crate::queue::item::sort_by_completion;
use crate::queue::scripts::Scripts;
use crate::queue::{ItemStatus, JobProgress, Options, WorkItem, WorkQueue};

/// Default key namespace
pub const DEFAULT_KEY_PREFIX: &str = "arena";

/// Error recorded on items that time out with no attempts left
pub const VISIBILITY_TIMEOUT_ERROR: &str = "visibility timeout expired";

const SCAN_BATCH: usize = 500;

/// Redis keys structure (prefix `arena` by default):
/// - arena:jobs                      - Set of known job IDs
/// - arena:job:{job}:pending         - List of pending item IDs (FIFO)
/// - arena:job:{job}:processing      - Sorted set, score = visibility deadline (ms)
/// - arena:job:{job}:completed       - Set of completed item IDs
/// - arena:job:{job}:failed          - Set of failed item IDs
/// - arena:job:{job}:items           - Set of every item ID pushed to the job
/// - arena:job:{job}:meta            - Hash with the job's started_at/completed_at
/// - arena:item:{item}               - Hash holding the item record
struct JobKeys {
    pending: String,
    processing: String,
    completed: String,
    failed: String,
    items: String,
    meta: String,
}

impl JobKeys {
    fn new(prefix: &str, job_id: &str) -> Self {
        let base = format!("{}:job:{}", prefix, job_id);
        Self {
            pending: format!("{}:pending", base),
            processing: format!("{}:processing", base),
            completed: format!("{}:completed", base),
            failed: format!("{}:failed", base),
            items: format!("{}:items", base),
            meta: format!("{}:meta", base),
        }
    }
}

/// Redis-backed work queue shared by every worker process.
///
/// Claimed items stay in the job's processing set until acked, nacked or
/// swept back by [`RedisQueue::requeue_timed_out_items`]. Nothing in this
/// type runs the sweep on its own; see `worker::Sweeper`.
#[derive(Clone)]
pub struct RedisQueue {
    conn: RedisConnectionManager,
    options: Options,
    key_prefix: String,
    scripts: Arc<Scripts>,
    closed: Arc<AtomicBool>,
}

impl RedisQueue {
    pub fn new(conn: RedisConnectionManager, options: Options) -> Self {
        Self {
            conn,
            options,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            scripts: Arc::new(Scripts::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open a managed connection to `redis_url`
    pub async fn connect(redis_url: &str, options: Options) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = RedisConnectionManager::new(client).await?;
        Ok(Self::new(conn, options))
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
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

    fn job_keys(&self, job_id: &str) -> JobKeys {
        JobKeys::new(&self.key_prefix, job_id)
    }

    fn jobs_key(&self) -> String {
        format!("{}:jobs", self.key_prefix)
    }

    fn item_key_prefix(&self) -> String {
        format!("{}:item:", self.key_prefix)
    }

    fn item_key(&self, item_id: &str) -> String {
        format!("{}{}", self.item_key_prefix(), item_id)
    }

    async fn job_exists(&self, keys: &JobKeys) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.scard(&keys.items).await?;
        Ok(count > 0)
    }

    async fn items_in_set(
        &self,
        job_id: &str,
        set_key: fn(&JobKeys) -> &str,
    ) -> QueueResult<Vec<WorkItem>> {
        self.ensure_open()?;
        let keys = self.job_keys(job_id);
        if !self.job_exists(&keys).await? {
            return Err(QueueError::JobNotFound);
        }

        let mut conn = self.conn.clone();
        let item_ids: Vec<String> = conn.smembers(set_key(&keys)).await?;
        if item_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for item_id in &item_ids {
            pipe.hgetall(self.item_key(item_id));
        }
        let records: Vec<HashMap<String, Vec<u8>>> = pipe.query_async(&mut conn).await?;

        let mut items = records
            .into_iter()
            .filter(|record| !record.is_empty())
            .map(decode_item)
            .collect::<QueueResult<Vec<_>>>()?;
        sort_by_completion(&mut items);
        Ok(items)
    }

    /// Move every processing item whose visibility deadline has passed back to
    /// the tail of the pending list and return how many were requeued.
    ///
    /// The item's attempt counter is left as it was; the next pop increments it
    /// as usual. Items that already used all their attempts are failed with
    /// [`VISIBILITY_TIMEOUT_ERROR`] instead of being requeued.
    /// Callers (the job controller or `worker::Sweeper`) must invoke this
    /// periodically; a crashed worker's items are never recovered otherwise.
    pub async fn requeue_timed_out_items(&self, job_id: &str) -> QueueResult<usize> {
        self.ensure_open()?;
        let keys = self.job_keys(job_id);
        let mut conn = self.conn.clone();
        let now = OffsetDateTime::now_utc();

        let (requeued, exhausted): (usize, usize) = self
            .scripts
            .requeue_timed_out
            .key(&keys.pending)
            .key(&keys.processing)
            .key(&keys.failed)
            .key(&keys.meta)
            .arg(self.item_key_prefix())
            .arg(unix_millis(now))
            .arg(format_timestamp(now)?)
            .arg(VISIBILITY_TIMEOUT_ERROR)
            .invoke_async(&mut conn)
            .await?;

        if requeued > 0 || exhausted > 0 {
            tracing::warn!(
                job_id = %job_id,
                requeued,
                exhausted,
                "Timed out work items recovered"
            );
        }

        Ok(requeued)
    }

    /// Job IDs that have had items pushed and have not been retired
    pub async fn list_jobs(&self) -> QueueResult<Vec<String>> {
        self.ensure_open()?;
        let mut conn = self.conn.clone();
        let mut job_ids: Vec<String> = conn.smembers(self.jobs_key()).await?;
        job_ids.sort();
        Ok(job_ids)
    }

    /// Drop a job from the job index; its items and sets are left untouched
    pub async fn retire_job(&self, job_id: &str) -> QueueResult<()> {
        self.ensure_open()?;
        let mut conn = self.conn.clone();
        let _: () = conn.srem(self.jobs_key(), job_id).await?;
        tracing::info!(job_id = %job_id, "Job retired from index");
        Ok(())
    }

    /// Drop a job from the job index if it has nothing pending or processing.
    ///
    /// The drain check and the removal run as one script, so a concurrent
    /// `push` either lands first (and the job stays indexed) or re-adds it.
    pub async fn retire_job_if_complete(&self, job_id: &str) -> QueueResult<bool> {
        self.ensure_open()?;
        let keys = self.job_keys(job_id);
        let mut conn = self.conn.clone();

        let retired: i64 = self
            .scripts
            .retire_if_drained
            .key(self.jobs_key())
            .key(&keys.pending)
            .key(&keys.processing)
            .arg(job_id)
            .invoke_async(&mut conn)
            .await?;

        if retired == 1 {
            tracing::info!(job_id = %job_id, "Job retired from index");
        }
        Ok(retired == 1)
    }

    /// Delete every key under this queue's prefix and return how many were removed
    pub async fn purge(&self) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", self.key_prefix);
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        tracing::info!(prefix = %self.key_prefix, deleted, "Queue keys purged");
        Ok(deleted)
    }
}

#[async_trait]
impl WorkQueue for RedisQueue {
    async fn push(&self, job_id: &str, items: Vec<WorkItem>) -> QueueResult<()> {
        self.ensure_open()?;
        if items.is_empty() {
            return Ok(());
        }

        let keys = self.job_keys(job_id);
        let max_attempts = self.options.max_attempts();
        let count = items.len();

        let mut pipe = redis::pipe();
        pipe.atomic();
        for mut item in items {
            item.prepare_for_push(job_id, max_attempts);
            let fields = encode_item(&item)?;
            pipe.hset_multiple(self.item_key(&item.id), &fields)
                .ignore()
                .sadd(&keys.items, &item.id)
                .ignore()
                .rpush(&keys.pending, &item.id)
                .ignore();
        }
        pipe.sadd(self.jobs_key(), job_id).ignore();

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        tracing::info!(job_id = %job_id, count, "Work items pushed");
        Ok(())
    }

    async fn pop(&self, job_id: &str) -> QueueResult<WorkItem> {
        self.ensure_open()?;
        let keys = self.job_keys(job_id);
        let mut conn = self.conn.clone();
        let now = OffsetDateTime::now_utc();
        let deadline = now + self.options.visibility_timeout;

        let record: Option<HashMap<String, Vec<u8>>> = self
            .scripts
            .pop
            .key(&keys.pending)
            .key(&keys.processing)
            .key(&keys.meta)
            .arg(self.item_key_prefix())
            .arg(unix_millis(deadline))
            .arg(format_timestamp(now)?)
            .invoke_async(&mut conn)
            .await?;

        let item = match record {
            Some(record) if !record.is_empty() => decode_item(record)?,
            _ => return Err(QueueError::QueueEmpty),
        };

        tracing::debug!(job_id = %job_id, item_id = %item.id, attempt = item.attempt, "Work item popped");
        Ok(item)
    }

    async fn ack(&self, job_id: &str, item_id: &str, result: Option<Vec<u8>>) -> QueueResult<()> {
        self.ensure_open()?;
        let keys = self.job_keys(job_id);
        let mut conn = self.conn.clone();
        let now = OffsetDateTime::now_utc();

        let outcome: i64 = self
            .scripts
            .ack
            .key(&keys.items)
            .key(&keys.pending)
            .key(&keys.processing)
            .key(&keys.completed)
            .key(&keys.meta)
            .arg(self.item_key(item_id))
            .arg(item_id)
            .arg(format_timestamp(now)?)
            .arg(result.unwrap_or_default())
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            -1 => Err(QueueError::JobNotFound),
            0 => Err(QueueError::ItemNotFound),
            _ => {
                tracing::debug!(job_id = %job_id, item_id = %item_id, "Work item completed");
                Ok(())
            }
        }
    }

    async fn nack(&self, job_id: &str, item_id: &str, error: Option<&str>) -> QueueResult<()> {
        self.ensure_open()?;
        let keys = self.job_keys(job_id);
        let mut conn = self.conn.clone();
        let now = OffsetDateTime::now_utc();

        let outcome: i64 = self
            .scripts
            .nack
            .key(&keys.items)
            .key(&keys.pending)
            .key(&keys.processing)
            .key(&keys.failed)
            .key(&keys.meta)
            .arg(self.item_key(item_id))
            .arg(item_id)
            .arg(format_timestamp(now)?)
            .arg(error.unwrap_or_default())
            .invoke_async(&mut conn)
            .await?;

        match outcome {
            -1 => Err(QueueError::JobNotFound),
            0 => Err(QueueError::ItemNotFound),
            1 => {
                tracing::warn!(job_id = %job_id, item_id = %item_id, "Work item failed, requeued");
                Ok(())
            }
            _ => {
                tracing::warn!(job_id = %job_id, item_id = %item_id, "Work item failed permanently");
                Ok(())
            }
        }
    }

    async fn progress(&self, job_id: &str) -> QueueResult<JobProgress> {
        self.ensure_open()?;
        let keys = self.job_keys(job_id);
        let mut conn = self.conn.clone();

        // MULTI/EXEC so the counts come from one consistent snapshot
        let (total, pending, processing, completed, failed, started_at, completed_at): (
            u64,
            u64,
            u64,
            u64,
            u64,
            Option<String>,
            Option<String>,
        ) = redis::pipe()
            .atomic()
            .scard(&keys.items)
            .llen(&keys.pending)
            .zcard(&keys.processing)
            .scard(&keys.completed)
            .scard(&keys.failed)
            .hget(&keys.meta, "started_at")
            .hget(&keys.meta, "completed_at")
            .query_async(&mut conn)
            .await?;

        if total == 0 {
            return Err(QueueError::JobNotFound);
        }

        let mut progress = JobProgress {
            job_id: job_id.to_string(),
            total,
            pending,
            processing,
            completed,
            failed,
            started_at: parse_optional_timestamp(started_at.as_deref())?,
            completed_at: None,
        };
        if progress.is_complete() {
            progress.completed_at = parse_optional_timestamp(completed_at.as_deref())?;
        }
        Ok(progress)
    }

    async fn get_completed_items(&self, job_id: &str) -> QueueResult<Vec<WorkItem>> {
        self.items_in_set(job_id, |keys| keys.completed.as_str()).await
    }

    async fn get_failed_items(&self, job_id: &str) -> QueueResult<Vec<WorkItem>> {
        self.items_in_set(job_id, |keys| keys.failed.as_str()).await
    }

    async fn close(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(QueueError::QueueClosed);
        }
        // The managed connection is released when the last clone is dropped
        tracing::info!(prefix = %self.key_prefix, "Redis queue closed");
        Ok(())
    }
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

fn format_timestamp(at: OffsetDateTime) -> QueueResult<String> {
    Ok(at.format(&Rfc3339)?)
}

fn parse_optional_timestamp(value: Option<&str>) -> QueueResult<Option<OffsetDateTime>> {
    match value {
        Some(value) if !value.is_empty() => Ok(Some(OffsetDateTime::parse(value, &Rfc3339)?)),
        _ => Ok(None),
    }
}

/// Flatten an item into hash fields; unset timestamps are omitted
fn encode_item(item: &WorkItem) -> QueueResult<Vec<(&'static str, Vec<u8>)>> {
    let mut fields = vec![
        ("id", item.id.clone().into_bytes()),
        ("job_id", item.job_id.clone().into_bytes()),
        ("scenario_id", item.scenario_id.clone().into_bytes()),
        ("provider_id", item.provider_id.clone().into_bytes()),
        ("bundle_url", item.bundle_url.clone().into_bytes()),
        ("config", item.config.clone()),
        ("status", item.status.as_str().as_bytes().to_vec()),
        ("attempt", item.attempt.to_string().into_bytes()),
        ("max_attempts", item.max_attempts.to_string().into_bytes()),
        ("created_at", format_timestamp(item.created_at)?.into_bytes()),
        ("error", item.error.clone().into_bytes()),
        ("result", item.result.clone()),
    ];
    if let Some(started_at) = item.started_at {
        fields.push(("started_at", format_timestamp(started_at)?.into_bytes()));
    }
    if let Some(completed_at) = item.completed_at {
        fields.push(("completed_at", format_timestamp(completed_at)?.into_bytes()));
    }
    Ok(fields)
}

fn decode_item(mut record: HashMap<String, Vec<u8>>) -> QueueResult<WorkItem> {
    let mut text = |field: &str| -> QueueResult<String> {
        let bytes = record.remove(field).unwrap_or_default();
        String::from_utf8(bytes)
            .map_err(|_| QueueError::CorruptRecord(format!("{} is not valid UTF-8", field)))
    };

    let id = text("id")?;
    let job_id = text("job_id")?;
    let scenario_id = text("scenario_id")?;
    let provider_id = text("provider_id")?;
    let bundle_url = text("bundle_url")?;
    let error = text("error")?;
    let status_text = text("status")?;
    let attempt_text = text("attempt")?;
    let max_attempts_text = text("max_attempts")?;
    let created_at_text = text("created_at")?;
    let started_at_text = text("started_at")?;
    let completed_at_text = text("completed_at")?;

    let status = ItemStatus::parse(&status_text)
        .ok_or_else(|| QueueError::CorruptRecord(format!("unknown status {:?}", status_text)))?;
    let attempt = parse_counter("attempt", &attempt_text)?;
    let max_attempts = parse_counter("max_attempts", &max_attempts_text)?;
    let created_at = parse_optional_timestamp(Some(created_at_text.as_str()))?
        .ok_or_else(|| QueueError::CorruptRecord("missing created_at".to_string()))?;

    Ok(WorkItem {
        id,
        job_id,
        scenario_id,
        provider_id,
        bundle_url,
        config: record.remove("config").unwrap_or_default(),
        status,
        attempt,
        max_attempts,
        created_at,
        started_at: parse_optional_timestamp(Some(started_at_text.as_str()))?,
        completed_at: parse_optional_timestamp(Some(completed_at_text.as_str()))?,
        error,
        result: record.remove("result").unwrap_or_default(),
    })
}

fn parse_counter(field: &str, value: &str) -> QueueResult<u32> {
    value
        .parse()
        .map_err(|_| QueueError::CorruptRecord(format!("{} is not a number: {:?}", field, value)))
}
