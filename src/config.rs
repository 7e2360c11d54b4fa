use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::queue::redis_queue::DEFAULT_KEY_PREFIX;
use crate::queue::{Options, DEFAULT_MAX_RETRIES, DEFAULT_VISIBILITY_TIMEOUT};

/// Which queue backend to build at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    /// In-process queue for development and single-replica deployments
    Memory,
    /// Shared Redis queue for multi-replica deployments
    Redis,
}

impl FromStr for QueueBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            _ => Err(ConfigError::Invalid("ARENA_QUEUE_BACKEND")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Backend
    pub backend: QueueBackend,
    pub redis_url: Option<String>,
    pub key_prefix: String,

    // Queue options
    pub visibility_timeout: Duration,
    pub max_retries: u32,

    // Sweeper
    pub sweep_interval: Duration,

    // Observability
    pub metrics_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            redis_url: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            sweep_interval: Duration::from_secs(30),
            metrics_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if exists

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("ARENA_QUEUE_BACKEND") {
            Some(value) => value.parse()?,
            None => defaults.backend,
        };

        let redis_url = lookup("REDIS_URL");
        if backend == QueueBackend::Redis && redis_url.is_none() {
            return Err(ConfigError::Missing("REDIS_URL"));
        }

        Ok(Self {
            backend,
            redis_url,
            key_prefix: lookup("ARENA_QUEUE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            visibility_timeout: parse_or(
                &lookup,
                "ARENA_QUEUE_VISIBILITY_TIMEOUT_SECS",
                defaults.visibility_timeout.as_secs(),
            )
            .map(Duration::from_secs)?,
            max_retries: parse_or(&lookup, "ARENA_QUEUE_MAX_RETRIES", defaults.max_retries)?,
            sweep_interval: parse_or(
                &lookup,
                "ARENA_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )
            .map(Duration::from_secs)?,
            metrics_enabled: parse_or(&lookup, "ARENA_QUEUE_METRICS", defaults.metrics_enabled)?,
        })
    }

    /// Queue options derived from this configuration
    pub fn queue_options(&self) -> Options {
        Options::default()
            .with_visibility_timeout(self.visibility_timeout)
            .with_max_retries(self.max_retries)
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid environment variable: {0}")]
    Invalid(&'static str),
}
