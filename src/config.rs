//! Configuration management.

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Redis configuration (used when the queue backend is `redis`)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Queue configuration
    #[serde(default)]
    pub queue: QueueSettings,

    /// Worker configuration
    #[serde(default)]
    pub worker: WorkerSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

/// Which queue backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackendKind {
    /// In-process queue, lost on restart. For development and tests.
    Memory,
    /// Redis list-backed queue.
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Backend selection
    #[serde(default = "default_queue_backend")]
    pub backend: QueueBackendKind,

    /// Redis list key for the batch mail queue
    #[serde(default = "default_queue_key")]
    pub key: String,

    /// Attempt ceiling before an occurrence is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Maximum items retained in the dead letter queue
    #[serde(default = "default_dead_letter_max_size")]
    pub dead_letter_max_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
            key: default_queue_key(),
            max_attempts: default_max_attempts(),
            dead_letter_max_size: default_dead_letter_max_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Worker name/identifier
    #[serde(default = "default_worker_name")]
    pub name: String,

    /// Poll interval for checking the queue (milliseconds)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Continue delivering to later recipients after a send failure.
    /// The reference behavior aborts the batch; leave this off unless you
    /// know you want partial delivery.
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            name: default_worker_name(),
            poll_interval_ms: default_poll_interval_ms(),
            continue_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

// Default value functions
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_queue_backend() -> QueueBackendKind {
    QueueBackendKind::Memory
}
fn default_queue_key() -> String {
    format!("sendwave:jobs:{}", crate::jobs::BATCH_MAIL_QUEUE)
}
fn default_max_attempts() -> u32 {
    5
}
fn default_dead_letter_max_size() -> usize {
    1000
}
fn default_worker_name() -> String {
    "sendwave-worker".to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_json_logging() -> bool {
    true
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("SENDWAVE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("SENDWAVE").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.queue.backend, QueueBackendKind::Memory);
        assert_eq!(config.queue.key, "sendwave:jobs:BATCH_MAIL_QUEUE");
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.worker.poll_interval_ms, 1000);
        assert!(!config.worker.continue_on_error);
    }
}
