//! Primary store contracts
//!
//! The indexing service never writes entities; it reads current state and
//! version logs to build index operations, and performs the structural half of
//! deletes (version purge, edge delete, node compaction). All calls are
//! blocking.

mod memory;

pub use memory::{InMemoryEntityStore, InMemoryGraphStore};

use crate::domain::model::{ApplicationScope, Edge, Entity, Id, MvccLogEntry};

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
  #[error("Store error: {0}")]
  Backend(String),
  #[error("Store timed out")]
  Timeout,
}

/// Entity versions
pub trait EntityStore: Send + Sync {
  /// Current version of an entity, `None` if absent or deleted
  fn load(&self, scope: &ApplicationScope, id: &Id) -> Result<Option<Entity>, StoreError>;

  /// Version log, newest first. Deleted markers are returned as entries with
  /// [`MvccState::Deleted`](crate::domain::model::MvccState::Deleted).
  fn versions(&self, scope: &ApplicationScope, id: &Id) -> Result<Vec<MvccLogEntry>, StoreError>;

  fn delete_versions(&self, scope: &ApplicationScope, entries: &[MvccLogEntry]) -> Result<(), StoreError>;

  /// Append a deleted marker for the entity
  fn mark(&self, scope: &ApplicationScope, id: &Id) -> Result<(), StoreError>;
}

/// Graph edges
pub trait GraphStore: Send + Sync {
  /// Edges pointing at `target`
  fn edges_to_target(&self, scope: &ApplicationScope, target: &Id) -> Result<Vec<Edge>, StoreError>;

  /// Delete an edge, returning it if it existed
  fn delete_edge(&self, scope: &ApplicationScope, edge: &Edge) -> Result<Option<Edge>, StoreError>;

  /// Mark a node for compaction
  fn mark_node(&self, scope: &ApplicationScope, node: &Id, timestamp: i64) -> Result<(), StoreError>;

  /// Remove every edge touching a marked node, returning the removed edges.
  /// Unmarked nodes compact to nothing.
  fn compact_node(&self, scope: &ApplicationScope, node: &Id) -> Result<Vec<Edge>, StoreError>;
}
