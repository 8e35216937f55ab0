//! Configuration for the async indexing service
//!
//! Loaded from TOML. Every key is optional and falls back to the defaults below,
//! so an empty file is a valid configuration.
//!
//! ```toml
//! [index]
//! worker-count = 2
//! event-concurrency-factor = 8
//!
//! [queue]
//! primary-region = "us-east-1"
//! local-quorum-timeout-ms = 1000
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

/// Hard ceiling on messages per receive, imposed by the queue implementations
pub const MAX_TAKE_CEILING: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Invalid config: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("Failed to render config: {0}")]
  Render(#[from] toml::ser::Error),
  #[error("Validation error: {0}")]
  Validation(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
  pub index: IndexProcessorConfig,
  pub queue: QueueConfig,
  pub logging: LoggingConfig,
}

impl Config {
  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let config: Config = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  /// Render the defaults as a TOML document
  pub fn template() -> Result<String, ConfigError> {
    Config::default().to_toml()
  }

  pub fn to_toml(&self) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(self)?)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.index.event_concurrency_factor == 0 {
      return Err(ConfigError::Validation("event-concurrency-factor must be at least 1".into()));
    }
    if self.queue.primary_region.is_empty() {
      return Err(ConfigError::Validation("primary-region must not be empty".into()));
    }
    if !self.queue.regions.contains(&self.queue.primary_region) {
      return Err(ConfigError::Validation(format!(
        "primary-region '{}' is not listed in regions",
        self.queue.primary_region
      )));
    }
    Ok(())
  }
}

/// Worker pool and indexing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IndexProcessorConfig {
  /// Workers polling the regular index queue
  pub worker_count: usize,
  /// Workers polling the utility queue
  pub worker_count_utility: usize,
  /// Workers polling the delete queue
  pub worker_count_delete: usize,
  /// Sleep after a failed poll before polling again
  pub failure_retry_backoff_ms: u64,
  /// How long received messages stay invisible to other consumers (ms)
  pub index_queue_visibility_timeout: u64,
  /// Long-poll wait for a receive (ms)
  pub index_queue_wait_timeout: u64,
  /// Receive cycles a single worker may have in flight at once
  pub event_concurrency_factor: usize,
  /// Messages per receive (clamped to 1..=10)
  pub max_take: usize,
  /// TTL of staged batches
  pub index_message_ttl_ms: u64,
  /// Prefix for index names and aliases
  pub index_prefix: String,
  /// Stage locally built batches and fan them out to every region instead of submitting directly
  pub replicate_batches: bool,
  /// Receive count after which a message is handed to the dead-letter sink (unset = redeliver forever)
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_receive_count: Option<u32>,
  /// Version log entries deleted per store call
  pub version_delete_buffer_size: usize,
  /// Newest log entries scanned when de-indexing old versions
  pub old_version_scan_limit: usize,
  /// How long an application's index is remembered as initialised
  pub index_init_cache_ttl_secs: u64,
}

impl Default for IndexProcessorConfig {
  fn default() -> Self {
    Self {
      worker_count: 1,
      worker_count_utility: 1,
      worker_count_delete: 1,
      failure_retry_backoff_ms: 2500,
      index_queue_visibility_timeout: 30_000,
      index_queue_wait_timeout: 1_000,
      event_concurrency_factor: 8,
      max_take: MAX_TAKE_CEILING,
      index_message_ttl_ms: 7 * 24 * 60 * 60 * 1000,
      index_prefix: "usergrid".to_string(),
      replicate_batches: false,
      max_receive_count: None,
      version_delete_buffer_size: 100,
      old_version_scan_limit: 100,
      index_init_cache_ttl_secs: 300,
    }
  }
}

impl IndexProcessorConfig {
  pub fn max_take(&self) -> usize {
    self.max_take.clamp(1, MAX_TAKE_CEILING)
  }

  pub fn failure_retry_backoff(&self) -> Duration {
    Duration::from_millis(self.failure_retry_backoff_ms)
  }

  pub fn visibility_timeout(&self) -> Duration {
    Duration::from_millis(self.index_queue_visibility_timeout)
  }

  pub fn wait_timeout(&self) -> Duration {
    Duration::from_millis(self.index_queue_wait_timeout)
  }

  /// Staged batch TTL in whole seconds (at least one)
  pub fn index_message_ttl_secs(&self) -> u64 {
    (self.index_message_ttl_ms / 1000).max(1)
  }

  pub fn version_delete_buffer_size(&self) -> usize {
    self.version_delete_buffer_size.max(1)
  }
}

/// Queue topology and consistency-fallback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct QueueConfig {
  /// Region this process runs in; events are tagged with it
  pub primary_region: String,
  /// Every region a topic send fans out to
  pub regions: Vec<String>,
  /// Window after an event's creation during which a staging miss is treated as replication lag
  pub local_quorum_timeout_ms: u64,
  /// Escalate to a quorum read once the window has passed
  pub quorum_fallback: bool,
  /// Without quorum fallback: give up on a staged batch this long after creation
  pub map_message_timeout_ms: u64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      primary_region: "us-east-1".to_string(),
      regions: vec!["us-east-1".to_string()],
      local_quorum_timeout_ms: 1_000,
      quorum_fallback: true,
      map_message_timeout_ms: 60_000,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LoggingConfig {
  /// off, error, warn, info, debug or trace
  pub level: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
    }
  }
}
