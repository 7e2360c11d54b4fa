// Library crate for the Arena work queue
// Exports modules for use by the sweeper binary, job controllers and workers

pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod state;
pub mod worker;

pub use error::{QueueError, QueueResult};
pub use queue::{
    InMemoryQueue, ItemStatus, JobProgress, MeteredQueue, Options, RedisQueue, WorkItem, WorkQueue,
};
