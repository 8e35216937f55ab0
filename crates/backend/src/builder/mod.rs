//! Event builder
//!
//! Turns a primary-store change into index operations by reading current state
//! back from the primary store. The builder never writes to the index and never
//! retries; failures go back to the caller, and the worker's redelivery is the
//! retry.
//!
//! Every document for an entity is keyed by the edge it is reached through, so
//! indexing an entity means one index request per incoming edge and de-indexing
//! a version means one de-index request per incoming edge.

mod delete;

use std::sync::Arc;

use tracing::{debug, trace};
use uuid::Uuid;

pub use self::delete::{EntityDeleteResult, NodeCompaction};
use crate::{
  domain::{
    config::IndexProcessorConfig,
    index::{DeIndexOperation, IndexLocationStrategy, IndexOperation, IndexOperationMessage, SearchEdge},
    model::{ApplicationScope, Edge, Id},
  },
  store::{EntityStore, GraphStore, StoreError},
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
  #[error("Entity not found: {0}")]
  EntityNotFound(Id),
  #[error("Store error: {0}")]
  Store(#[from] StoreError),
}

/// Tunables the builder reads from [`IndexProcessorConfig`]
#[derive(Debug, Clone)]
pub struct BuilderConfig {
  pub index_prefix: String,
  pub version_delete_buffer_size: usize,
  pub old_version_scan_limit: usize,
}

impl BuilderConfig {
  pub fn from_index_config(config: &IndexProcessorConfig) -> Self {
    Self {
      index_prefix: config.index_prefix.clone(),
      version_delete_buffer_size: config.version_delete_buffer_size(),
      old_version_scan_limit: config.old_version_scan_limit,
    }
  }
}

impl Default for BuilderConfig {
  fn default() -> Self {
    Self::from_index_config(&IndexProcessorConfig::default())
  }
}

#[derive(Clone)]
pub struct EventBuilder {
  entities: Arc<dyn EntityStore>,
  graph: Arc<dyn GraphStore>,
  config: BuilderConfig,
}

impl EventBuilder {
  pub fn new(entities: Arc<dyn EntityStore>, graph: Arc<dyn GraphStore>, config: BuilderConfig) -> Self {
    Self {
      entities,
      graph,
      config,
    }
  }

  pub fn location(&self, scope: &ApplicationScope) -> IndexLocationStrategy {
    IndexLocationStrategy::for_scope(&self.config.index_prefix, scope)
  }

  /// Index the current version of an entity through every edge pointing at it.
  ///
  /// Returns `None` when the entity was modified before `updated_since`, so a
  /// stale event never overwrites a newer concurrent write. Entities without a
  /// modified timestamp are always indexed.
  pub fn build_entity_index(
    &self,
    scope: &ApplicationScope,
    entity_id: &Id,
    updated_since: i64,
  ) -> Result<Option<IndexOperationMessage>, BuildError> {
    let entity = self
      .entities
      .load(scope, entity_id)?
      .ok_or_else(|| BuildError::EntityNotFound(entity_id.clone()))?;

    if let Some(modified) = entity.modified()
      && modified < updated_since
    {
      trace!(entity = %entity_id, modified, updated_since, "Skipping stale entity index");
      return Ok(None);
    }

    let location = self.location(scope);
    let mut batch = IndexOperationMessage::new();
    for edge in self.graph.edges_to_target(scope, entity_id)? {
      batch.add_index_request(IndexOperation::for_entity(
        &location,
        scope,
        &entity,
        &SearchEdge::from_source(&edge),
      ));
    }

    debug!(entity = %entity_id, requests = batch.len(), "Built entity index batch");
    Ok(Some(batch))
  }

  /// Index an entity through a newly written edge. The entity is loaded fresh
  /// rather than trusted from the caller.
  pub fn build_new_edge(
    &self,
    scope: &ApplicationScope,
    entity_id: &Id,
    edge: &Edge,
  ) -> Result<IndexOperationMessage, BuildError> {
    debug!(scope = %scope, entity = %entity_id, edge = %edge, "Indexing new edge");

    let entity = self
      .entities
      .load(scope, entity_id)?
      .ok_or_else(|| BuildError::EntityNotFound(entity_id.clone()))?;

    let mut batch = IndexOperationMessage::new();
    batch.add_index_request(IndexOperation::for_entity(
      &self.location(scope),
      scope,
      &entity,
      &SearchEdge::from_source(edge),
    ));
    Ok(batch)
  }

  /// De-index every version of the edge target reached through `edge`, then
  /// delete the edge itself.
  ///
  /// The de-index requests are derived before the structural delete, so a crash
  /// in between leaves an index entry for a live edge rather than a live edge
  /// with no index trace.
  pub fn build_delete_edge(&self, scope: &ApplicationScope, edge: &Edge) -> Result<IndexOperationMessage, BuildError> {
    debug!(scope = %scope, edge = %edge, "Deleting edge");

    let batch = self.de_index_edge(scope, edge, &edge.target, None)?;

    if self.graph.delete_edge(scope, edge)?.is_none() {
      debug!(edge = %edge, "Edge already gone, de-indexing anyway");
    }

    Ok(batch)
  }

  /// De-index old versions of an entity, at or before `marked_version`.
  ///
  /// The scan starts at `marked_version` and walks at most
  /// `old_version_scan_limit` entries towards older versions. The current
  /// version is never touched.
  pub fn de_index_old_versions(
    &self,
    scope: &ApplicationScope,
    entity_id: &Id,
    marked_version: Uuid,
  ) -> Result<IndexOperationMessage, BuildError> {
    debug!(scope = %scope, entity = %entity_id, %marked_version, "Removing old versions from index");

    let current = self.entities.load(scope, entity_id)?.map(|entity| entity.version);

    let versions: Vec<Uuid> = self
      .entities
      .versions(scope, entity_id)?
      .into_iter()
      .map(|entry| entry.version)
      .skip_while(|version| *version > marked_version)
      .take(self.config.old_version_scan_limit)
      .filter(|version| Some(*version) != current)
      .collect();

    let location = self.location(scope);
    let edges = self.graph.edges_to_target(scope, entity_id)?;

    let mut batch = IndexOperationMessage::new();
    for version in &versions {
      for edge in &edges {
        batch.add_de_index_request(DeIndexOperation::for_version(
          &location,
          scope,
          entity_id,
          version,
          &SearchEdge::from_source(edge),
        ));
      }
    }

    trace!(entity = %entity_id, versions = versions.len(), requests = batch.len(), "Built old version de-index batch");
    Ok(batch)
  }

  /// De-index requests for `edge` covering every version of `node`, or only
  /// `versions` when given
  fn de_index_edge(
    &self,
    scope: &ApplicationScope,
    edge: &Edge,
    node: &Id,
    versions: Option<&[Uuid]>,
  ) -> Result<IndexOperationMessage, BuildError> {
    let versions = match versions {
      Some(versions) => versions.to_vec(),
      None => self
        .entities
        .versions(scope, node)?
        .into_iter()
        .map(|entry| entry.version)
        .collect(),
    };

    let location = self.location(scope);
    let search_edge = SearchEdge::from_source(edge);

    let mut batch = IndexOperationMessage::new();
    for version in &versions {
      batch.add_de_index_request(DeIndexOperation::for_version(&location, scope, node, version, &search_edge));
    }
    Ok(batch)
  }
}
