//! Async indexing events
//!
//! Events are the queue payloads. They carry only identifying data (scope + ids),
//! never entity bodies, so a redelivered event always indexes the latest state.
//! The set of variants is closed: the dispatcher matches on [`EventKind`]
//! exhaustively, and a body that does not decode to a known variant is a
//! decode failure rather than a silently dropped "unknown" event.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
  index::IndexLocationStrategy,
  model::{ApplicationScope, Edge, EntityIdScope, Id, now_millis},
};

/// Envelope shared by every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncEvent {
  /// Region the event was produced in
  pub source_region: String,
  /// Creation timestamp (epoch millis), used for cycle latency and quorum fallback timing
  pub creation_time: i64,
  #[serde(flatten)]
  pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
  /// Re-index an entity if it changed at or after `updated_after`
  EntityIndexUpdate {
    entity_id_scope: EntityIdScope,
    updated_after: i64,
  },
  /// Index a freshly written edge
  NewEdge {
    application_scope: ApplicationScope,
    entity_id: Id,
    edge: Edge,
  },
  /// Delete an edge and de-index every document reached through it
  EdgeDelete { application_scope: ApplicationScope, edge: Edge },
  /// De-index and purge an entity's deleted versions, then compact its graph node
  EntityDelete {
    entity_id_scope: EntityIdScope,
    #[serde(default)]
    is_collection_delete: bool,
    #[serde(default = "max_timestamp")]
    updated_before: i64,
  },
  /// De-index versions at or before `marked_version`
  DeIndexOldVersions {
    entity_id_scope: EntityIdScope,
    marked_version: Uuid,
  },
  /// Create (idempotently) an application's search index
  InitializeApplicationIndex { location: IndexLocationStrategy },
  /// Pointer to a batch staged in the staging store
  IndexBatchReference { batch_id: Uuid },
}

fn max_timestamp() -> i64 {
  i64::MAX
}

impl AsyncEvent {
  pub fn new(source_region: impl Into<String>, kind: EventKind) -> Self {
    Self {
      source_region: source_region.into(),
      creation_time: now_millis(),
      kind,
    }
  }

  /// Short variant name for logs
  pub fn name(&self) -> &'static str {
    match self.kind {
      EventKind::EntityIndexUpdate { .. } => "entity_index_update",
      EventKind::NewEdge { .. } => "new_edge",
      EventKind::EdgeDelete { .. } => "edge_delete",
      EventKind::EntityDelete { .. } => "entity_delete",
      EventKind::DeIndexOldVersions { .. } => "de_index_old_versions",
      EventKind::InitializeApplicationIndex { .. } => "initialize_application_index",
      EventKind::IndexBatchReference { .. } => "index_batch_reference",
    }
  }

  pub fn to_json(&self) -> Result<String, serde_json::Error> {
    serde_json::to_string(self)
  }

  pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(body)
  }
}
