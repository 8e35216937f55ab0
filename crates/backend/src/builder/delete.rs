//! Entity delete
//!
//! An entity delete has three parts:
//!
//! 1. de-index every document of the versions up to the newest DELETED marker
//! 2. purge those versions from the version log, in fixed-size chunks
//! 3. compact the entity's graph node
//!
//! Parts 1 and 2 only happen when a DELETED marker exists; deleting something
//! that was never marked is already consistent. Compaction is always handed
//! back as a separate step for the caller to run.

use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use super::{BuildError, EventBuilder};
use crate::{
  domain::{
    index::{DeIndexOperation, IndexLocationStrategy, IndexOperationMessage, SearchEdge},
    model::{ApplicationScope, Id, MvccLogEntry, now_millis},
  },
  store::GraphStore,
};

pub struct EntityDeleteResult {
  /// De-index requests for the deleted versions
  pub de_index: IndexOperationMessage,
  /// Version log entries purged from the store
  pub deleted_versions: Vec<MvccLogEntry>,
  pub compaction: NodeCompaction,
}

/// Deferred graph compaction for a deleted entity's node
pub struct NodeCompaction {
  builder: EventBuilder,
  graph: Arc<dyn GraphStore>,
  scope: ApplicationScope,
  node: Id,
  deleted_versions: Vec<Uuid>,
}

impl NodeCompaction {
  pub fn node(&self) -> &Id {
    &self.node
  }

  /// Remove the node's edges and return de-index requests for every document
  /// reachable through them.
  ///
  /// Edges pointing at the node de-index the deleted versions; edges leaving
  /// the node de-index every version of their target.
  pub fn run(self) -> Result<IndexOperationMessage, BuildError> {
    let removed = self.graph.compact_node(&self.scope, &self.node)?;
    debug!(node = %self.node, edges = removed.len(), "Compacted node");

    let mut batch = IndexOperationMessage::new();
    for edge in &removed {
      if edge.target == self.node {
        batch.ingest(
          self
            .builder
            .de_index_edge(&self.scope, edge, &self.node, Some(&self.deleted_versions))?,
        );
      } else {
        batch.ingest(self.builder.de_index_edge(&self.scope, edge, &edge.target, None)?);
      }
    }
    Ok(batch)
  }
}

impl EventBuilder {
  /// Delete an entity's marked versions from the index and the version log.
  ///
  /// With `is_collection_delete` the entity and its graph node are marked first.
  /// Entities modified after `updated_before` are left alone.
  pub fn build_entity_delete(
    &self,
    scope: &ApplicationScope,
    entity_id: &Id,
    is_collection_delete: bool,
    updated_before: i64,
  ) -> Result<EntityDeleteResult, BuildError> {
    debug!(
      scope = %scope,
      entity = %entity_id,
      is_collection_delete,
      updated_before,
      "Deleting entity from index"
    );

    let will_delete = match self.entities.load(scope, entity_id)? {
      Some(entity) => entity.modified().is_none_or(|modified| modified <= updated_before),
      None => true,
    };

    if !will_delete {
      debug!(entity = %entity_id, "Entity modified after delete cutoff, skipping");
      return Ok(self.empty_delete(scope, entity_id));
    }

    if is_collection_delete {
      self.entities.mark(scope, entity_id)?;
      self.graph.mark_node(scope, entity_id, now_millis())?;
    }

    let versions = self.entities.versions(scope, entity_id)?;
    let Some(marked) = versions.iter().find(|entry| entry.is_deleted()).map(|entry| entry.version) else {
      info!(entity = %entity_id, "No entity versions to delete");
      return Ok(self.empty_delete(scope, entity_id));
    };

    let to_delete: Vec<MvccLogEntry> = versions.into_iter().filter(|entry| entry.version <= marked).collect();
    for chunk in to_delete.chunks(self.config.version_delete_buffer_size) {
      self.entities.delete_versions(scope, chunk)?;
    }

    let deleted: Vec<Uuid> = to_delete.iter().map(|entry| entry.version).collect();
    let de_index = self.de_index_versions(&self.location(scope), scope, entity_id, &deleted)?;

    debug!(
      entity = %entity_id,
      versions = to_delete.len(),
      requests = de_index.len(),
      "Built entity delete"
    );

    Ok(EntityDeleteResult {
      de_index,
      deleted_versions: to_delete,
      compaction: self.compaction(scope, entity_id, deleted),
    })
  }

  /// De-index `versions` through every edge currently pointing at the entity
  fn de_index_versions(
    &self,
    location: &IndexLocationStrategy,
    scope: &ApplicationScope,
    entity_id: &Id,
    versions: &[Uuid],
  ) -> Result<IndexOperationMessage, BuildError> {
    let mut batch = IndexOperationMessage::new();
    for edge in self.graph.edges_to_target(scope, entity_id)? {
      let search_edge = SearchEdge::from_source(&edge);
      for version in versions {
        batch.add_de_index_request(DeIndexOperation::for_version(
          location,
          scope,
          entity_id,
          version,
          &search_edge,
        ));
      }
    }
    Ok(batch)
  }

  fn empty_delete(&self, scope: &ApplicationScope, entity_id: &Id) -> EntityDeleteResult {
    EntityDeleteResult {
      de_index: IndexOperationMessage::new(),
      deleted_versions: Vec::new(),
      compaction: self.compaction(scope, entity_id, Vec::new()),
    }
  }

  fn compaction(&self, scope: &ApplicationScope, entity_id: &Id, deleted_versions: Vec<Uuid>) -> NodeCompaction {
    NodeCompaction {
      builder: self.clone(),
      graph: self.graph.clone(),
      scope: scope.clone(),
      node: entity_id.clone(),
      deleted_versions,
    }
  }
}
