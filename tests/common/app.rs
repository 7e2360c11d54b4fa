use std::time::Duration;

use arena_queue::config::{Config, QueueBackend};
use arena_queue::queue::{Options, RedisQueue};
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Test configuration
#[allow(dead_code)]
pub fn test_config() -> Config {
    dotenvy::dotenv().ok();

    Config {
        backend: QueueBackend::Memory,
        redis_url: Some(redis_url()),
        ..Config::default()
    }
}

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Redis queue isolated under a unique key prefix; purge it when the test ends
pub struct TestRedis {
    pub queue: RedisQueue,
}

#[allow(dead_code)]
impl TestRedis {
    /// Delete every key the test wrote
    pub async fn cleanup(self) {
        if let Err(e) = self.queue.purge().await {
            eprintln!("failed to purge test keys under {}: {}", self.queue.key_prefix(), e);
        }
    }
}

/// Connect to the test Redis under a fresh key prefix.
///
/// Redis tests are `#[ignore]`d and run with `cargo test -- --ignored`, so an
/// unreachable server is a failure, not a skip.
#[allow(dead_code)]
pub async fn redis_queue(options: Options) -> TestRedis {
    dotenvy::dotenv().ok();

    let url = redis_url();
    let queue = tokio::time::timeout(CONNECT_TIMEOUT, RedisQueue::connect(&url, options))
        .await
        .unwrap_or_else(|_| panic!("redis at {} did not answer in time", url))
        .unwrap_or_else(|e| panic!("redis at {} unavailable: {}", url, e));

    let prefix = format!("arena-test-{}", Uuid::new_v4());
    TestRedis {
        queue: queue.with_key_prefix(prefix),
    }
}
