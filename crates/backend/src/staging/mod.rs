//! Batch staging store
//!
//! Large index batches are not put on the queue. The producer writes them to a
//! replicated key-value store under a time-ordered key with a TTL, and only the
//! key travels on the queue. Readers try a cheap eventually-consistent read
//! first and can fall back to a quorum read.

mod memory;

pub use memory::{InMemoryStagingStore, Replication};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StagingError {
  #[error("Staging store error: {0}")]
  Backend(String),
  #[error("Staging store timed out")]
  Timeout,
}

/// Contract the indexing service consumes. All calls are blocking.
pub trait StagingStore: Send + Sync {
  fn put_string(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StagingError>;

  /// Eventually consistent read
  fn get_string(&self, key: &str) -> Result<Option<String>, StagingError>;

  /// Quorum read
  fn get_string_high_consistency(&self, key: &str) -> Result<Option<String>, StagingError>;
}
