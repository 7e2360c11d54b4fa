mod app;
pub mod contract;
mod factory;

#[allow(unused_imports)]
pub use app::{redis_queue, test_config, TestRedis};
#[allow(unused_imports)]
pub use factory::Factory;
