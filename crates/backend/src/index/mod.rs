//! Index-write layer contract
//!
//! The search index itself is external. The service only ever submits whole
//! batches of index/de-index requests and asks for an application's index to
//! exist before writing to it.

mod memory;

pub use memory::InMemoryIndex;

use crate::domain::index::{IndexLocationStrategy, IndexOperationMessage};

#[derive(Debug, Clone, thiserror::Error)]
pub enum IndexError {
  #[error("Index write rejected: {0}")]
  Rejected(String),
  #[error("Index does not exist: {0}")]
  MissingIndex(String),
  #[error("Index unavailable: {0}")]
  Unavailable(String),
}

/// Blocking index-write contract.
///
/// `submit` must be idempotent: the same request applied twice leaves the same
/// document state, since redelivery re-submits whole cycles.
pub trait IndexWriter: Send + Sync {
  /// Apply every request in the batch; returns once the write is acknowledged
  fn submit(&self, batch: &IndexOperationMessage) -> Result<(), IndexError>;

  /// Create the index and aliases if missing. Safe to call repeatedly.
  fn ensure_index(&self, location: &IndexLocationStrategy) -> Result<(), IndexError>;
}
