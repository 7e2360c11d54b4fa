//! Behaviour every `WorkQueue` backend must share. Each check takes a fresh
//! queue built with [`CONTRACT_MAX_RETRIES`].
#![allow(dead_code)]

use arena_queue::queue::{ItemStatus, WorkQueue};
use arena_queue::QueueError;

use super::Factory;

/// Attempts granted to each item by queues under test
pub const CONTRACT_MAX_RETRIES: u32 = 2;

pub async fn pop_returns_items_in_push_order(queue: &dyn WorkQueue) {
    let factory = Factory::new();
    let job_id = factory.job_id();
    let items = factory.items(3);
    let ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();

    queue.push(job_id, items).await.unwrap();

    for expected in &ids {
        let item = queue.pop(job_id).await.unwrap();
        assert_eq!(&item.id, expected);
        assert_eq!(item.status, ItemStatus::Processing);
        assert_eq!(item.attempt, 1);
        assert_eq!(item.max_attempts, CONTRACT_MAX_RETRIES);
        assert!(item.started_at.is_some());
        assert!(item.completed_at.is_none());
    }

    assert_eq!(queue.pop(job_id).await, Err(QueueError::QueueEmpty));

    let progress = queue.progress(job_id).await.unwrap();
    assert_eq!(progress.total, 3);
    assert_eq!(progress.pending, 0);
    assert_eq!(progress.processing, 3);
    assert!(progress.started_at.is_some());
    assert!(!progress.is_complete());
}

pub async fn popped_item_keeps_payload(queue: &dyn WorkQueue) {
    let factory = Factory::new();
    let job_id = factory.job_id();
    let pushed = factory.item("refund-flow");

    queue.push(job_id, vec![pushed.clone()]).await.unwrap();
    let popped = queue.pop(job_id).await.unwrap();

    assert_eq!(popped.id, pushed.id);
    assert_eq!(popped.job_id, job_id);
    assert_eq!(popped.scenario_id, "refund-flow");
    assert_eq!(popped.provider_id, "openai-gpt");
    assert_eq!(popped.bundle_url, pushed.bundle_url);
    assert_eq!(popped.config, pushed.config);
}

pub async fn pop_on_unknown_job_is_empty(queue: &dyn WorkQueue) {
    assert_eq!(queue.pop("job-never-pushed").await, Err(QueueError::QueueEmpty));
}

pub async fn ack_completes_item_and_stores_result(queue: &dyn WorkQueue) {
    let factory = Factory::new();
    let job_id = factory.job_id();
    queue.push(job_id, factory.items(2)).await.unwrap();

    let first = queue.pop(job_id).await.unwrap();
    queue
        .ack(job_id, &first.id, Some(b"{\"score\":0.9}".to_vec()))
        .await
        .unwrap();

    let progress = queue.progress(job_id).await.unwrap();
    assert_eq!(progress.completed, 1);
    assert!(progress.completed_at.is_none());

    let second = queue.pop(job_id).await.unwrap();
    queue.ack(job_id, &second.id, None).await.unwrap();

    let progress = queue.progress(job_id).await.unwrap();
    assert!(progress.is_complete());
    assert_eq!(progress.completed, 2);
    assert_eq!(progress.success_rate(), 100.0);
    assert!(progress.completed_at.is_some());

    let completed = queue.get_completed_items(job_id).await.unwrap();
    assert_eq!(completed.len(), 2);
    let stored = completed.iter().find(|item| item.id == first.id).unwrap();
    assert_eq!(stored.status, ItemStatus::Completed);
    assert_eq!(stored.result, b"{\"score\":0.9}".to_vec());
    assert!(stored.completed_at.is_some());

    assert!(queue.get_failed_items(job_id).await.unwrap().is_empty());
}

pub async fn second_ack_is_rejected(queue: &dyn WorkQueue) {
    let factory = Factory::new();
    let job_id = factory.job_id();
    queue.push(job_id, factory.items(1)).await.unwrap();

    let item = queue.pop(job_id).await.unwrap();
    queue.ack(job_id, &item.id, None).await.unwrap();

    assert_eq!(
        queue.ack(job_id, &item.id, None).await,
        Err(QueueError::ItemNotFound)
    );
    assert_eq!(
        queue.nack(job_id, &item.id, Some("late")).await,
        Err(QueueError::ItemNotFound)
    );
    assert_eq!(queue.progress(job_id).await.unwrap().completed, 1);
}

pub async fn nack_retries_until_attempts_run_out(queue: &dyn WorkQueue) {
    let factory = Factory::new();
    let job_id = factory.job_id();
    queue.push(job_id, factory.items(1)).await.unwrap();

    let item = queue.pop(job_id).await.unwrap();
    assert_eq!(item.attempt, 1);
    queue.nack(job_id, &item.id, Some("rate limited")).await.unwrap();

    let progress = queue.progress(job_id).await.unwrap();
    assert_eq!(progress.pending, 1);
    assert_eq!(progress.failed, 0);

    let retried = queue.pop(job_id).await.unwrap();
    assert_eq!(retried.id, item.id);
    assert_eq!(retried.attempt, 2);
    queue
        .nack(job_id, &retried.id, Some("provider returned 500"))
        .await
        .unwrap();

    assert_eq!(queue.pop(job_id).await, Err(QueueError::QueueEmpty));

    let progress = queue.progress(job_id).await.unwrap();
    assert!(progress.is_complete());
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.success_rate(), 0.0);

    let failed = queue.get_failed_items(job_id).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, ItemStatus::Failed);
    assert_eq!(failed[0].attempt, CONTRACT_MAX_RETRIES);
    assert_eq!(failed[0].error, "provider returned 500");
    assert!(failed[0].completed_at.is_some());
}

pub async fn retried_item_goes_to_the_tail(queue: &dyn WorkQueue) {
    let factory = Factory::new();
    let job_id = factory.job_id();
    let items = factory.items(2);
    let (first_id, second_id) = (items[0].id.clone(), items[1].id.clone());
    queue.push(job_id, items).await.unwrap();

    let first = queue.pop(job_id).await.unwrap();
    assert_eq!(first.id, first_id);
    queue.nack(job_id, &first.id, None).await.unwrap();

    assert_eq!(queue.pop(job_id).await.unwrap().id, second_id);
    assert_eq!(queue.pop(job_id).await.unwrap().id, first_id);
}

pub async fn unknown_ids_are_reported(queue: &dyn WorkQueue) {
    let factory = Factory::new();
    let job_id = factory.job_id();
    let items = factory.items(2);
    let pending_id = items[1].id.clone();
    queue.push(job_id, items).await.unwrap();
    queue.pop(job_id).await.unwrap();

    assert_eq!(
        queue.ack("job-never-pushed", "item", None).await,
        Err(QueueError::JobNotFound)
    );
    assert_eq!(
        queue.nack("job-never-pushed", "item", None).await,
        Err(QueueError::JobNotFound)
    );
    assert_eq!(
        queue.ack(job_id, "item-never-pushed", None).await,
        Err(QueueError::ItemNotFound)
    );
    // Pending items have not been claimed yet
    assert_eq!(
        queue.ack(job_id, &pending_id, None).await,
        Err(QueueError::ItemNotFound)
    );
    assert_eq!(
        queue.progress("job-never-pushed").await,
        Err(QueueError::JobNotFound)
    );
    assert_eq!(
        queue.get_completed_items("job-never-pushed").await,
        Err(QueueError::JobNotFound)
    );
    assert_eq!(
        queue.get_failed_items("job-never-pushed").await,
        Err(QueueError::JobNotFound)
    );
}

pub async fn progress_counts_add_up(queue: &dyn WorkQueue) {
    let factory = Factory::new();
    let job_id = factory.job_id();
    queue.push(job_id, factory.items(5)).await.unwrap();

    let a = queue.pop(job_id).await.unwrap();
    let b = queue.pop(job_id).await.unwrap();
    let c = queue.pop(job_id).await.unwrap();
    queue.ack(job_id, &a.id, None).await.unwrap();
    queue.nack(job_id, &b.id, Some("boom")).await.unwrap();

    let progress = queue.progress(job_id).await.unwrap();
    assert_eq!(progress.total, 5);
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.failed, 0);
    assert_eq!(progress.processing, 1);
    assert_eq!(progress.pending, 3);
    assert_eq!(
        progress.pending + progress.processing + progress.completed + progress.failed,
        progress.total
    );
    assert!(!progress.is_complete());

    queue.ack(job_id, &c.id, None).await.unwrap();
    while let Ok(item) = queue.pop(job_id).await {
        if item.id == b.id {
            queue.nack(job_id, &item.id, Some("boom again")).await.unwrap();
        } else {
            queue.ack(job_id, &item.id, None).await.unwrap();
        }
    }

    let progress = queue.progress(job_id).await.unwrap();
    assert!(progress.is_complete());
    assert_eq!(progress.completed, 4);
    assert_eq!(progress.failed, 1);
    assert!((progress.success_rate() - 80.0).abs() < 1e-9);
}

pub async fn push_appends_to_existing_job(queue: &dyn WorkQueue) {
    let factory = Factory::new();
    let job_id = factory.job_id();
    let first_batch = factory.items(1);
    let second_batch = factory.items(1);
    let first_id = first_batch[0].id.clone();
    let second_id = second_batch[0].id.clone();

    queue.push(job_id, first_batch).await.unwrap();
    queue.push(job_id, second_batch).await.unwrap();
    queue.push(job_id, Vec::new()).await.unwrap();

    assert_eq!(queue.progress(job_id).await.unwrap().total, 2);
    assert_eq!(queue.pop(job_id).await.unwrap().id, first_id);
    assert_eq!(queue.pop(job_id).await.unwrap().id, second_id);
}

pub async fn closed_queue_rejects_calls(queue: &dyn WorkQueue) {
    let factory = Factory::new();
    let job_id = factory.job_id();
    queue.push(job_id, factory.items(1)).await.unwrap();

    queue.close().await.unwrap();

    assert_eq!(queue.pop(job_id).await, Err(QueueError::QueueClosed));
    assert_eq!(
        queue.push(job_id, factory.items(1)).await,
        Err(QueueError::QueueClosed)
    );
    assert_eq!(queue.progress(job_id).await, Err(QueueError::QueueClosed));
    assert_eq!(queue.close().await, Err(QueueError::QueueClosed));
}
