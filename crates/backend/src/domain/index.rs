//! Index operation batches
//!
//! An [`IndexOperationMessage`] accumulates index and de-index requests for the
//! search index. Every request is keyed by a document id that encodes the owning
//! application, so the worker can lazily ensure the target indexes exist.
//!
//! Document id layout:
//!
//! ```text
//! {app uuid}_{app type}__{entity uuid}_{entity type}__{version}__{node uuid}_{node type}__{edge name}__{source|target}
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::model::{ApplicationScope, Edge, Entity, Id, now_millis};

/// Which end of an edge the indexed entity sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchNodeType {
  Source,
  Target,
}

impl SearchNodeType {
  fn as_str(&self) -> &'static str {
    match self {
      Self::Source => "source",
      Self::Target => "target",
    }
  }
}

/// The edge an index document is reachable through
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchEdge {
  pub node_id: Id,
  pub name: String,
  pub node_type: SearchNodeType,
}

impl SearchEdge {
  /// Documents for an edge's target are found by searching from the edge source
  pub fn from_source(edge: &Edge) -> Self {
    Self {
      node_id: edge.source.clone(),
      name: edge.edge_type.clone(),
      node_type: SearchNodeType::Source,
    }
  }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid index document id: {0}")]
pub struct InvalidDocumentId(pub String);

/// Build the document id for an entity version reached through `edge`
pub fn index_doc_id(scope: &ApplicationScope, entity_id: &Id, version: &Uuid, edge: &SearchEdge) -> String {
  format!(
    "{}_{}__{}_{}__{}__{}_{}__{}__{}",
    scope.application.uuid,
    scope.application.kind,
    entity_id.uuid,
    entity_id.kind,
    version,
    edge.node_id.uuid,
    edge.node_id.kind,
    edge.name,
    edge.node_type.as_str()
  )
}

/// Recover the owning application id from a document id
pub fn application_id_from_doc_id(doc_id: &str) -> Result<Uuid, InvalidDocumentId> {
  let prefix = doc_id
    .split_once('_')
    .map(|(app, _)| app)
    .ok_or_else(|| InvalidDocumentId(doc_id.to_string()))?;

  Uuid::parse_str(prefix).map_err(|_| InvalidDocumentId(doc_id.to_string()))
}

/// Where an application's documents live in the search index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexLocationStrategy {
  pub application_id: Uuid,
  pub index_root_name: String,
  pub write_alias: String,
  pub read_alias: String,
}

impl IndexLocationStrategy {
  pub fn for_application(prefix: &str, application_id: Uuid) -> Self {
    Self {
      application_id,
      index_root_name: format!("{}_applications", prefix),
      write_alias: format!("{}_{}_write_alias", prefix, application_id),
      read_alias: format!("{}_{}_read_alias", prefix, application_id),
    }
  }

  pub fn for_scope(prefix: &str, scope: &ApplicationScope) -> Self {
    Self::for_application(prefix, scope.application_id())
  }
}

/// Request to upsert a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexOperation {
  pub index: String,
  pub document_id: String,
  pub document: Map<String, Value>,
}

impl IndexOperation {
  /// Build the document for `entity` as seen through `edge`
  pub fn for_entity(location: &IndexLocationStrategy, scope: &ApplicationScope, entity: &Entity, edge: &SearchEdge) -> Self {
    let document_id = index_doc_id(scope, &entity.id, &entity.version, edge);

    let mut document = entity.fields.clone();
    document.insert("entityId".into(), Value::String(entity.id.uuid.to_string()));
    document.insert("entityType".into(), Value::String(entity.id.kind.clone()));
    document.insert("entityVersion".into(), Value::String(entity.version.to_string()));
    document.insert("edgeName".into(), Value::String(edge.name.clone()));
    document.insert("edgeNodeId".into(), Value::String(edge.node_id.uuid.to_string()));
    document.insert("applicationId".into(), Value::String(scope.application_id().to_string()));

    Self {
      index: location.write_alias.clone(),
      document_id,
      document,
    }
  }
}

/// Request to remove a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeIndexOperation {
  pub index: String,
  pub document_id: String,
}

impl DeIndexOperation {
  pub fn for_version(
    location: &IndexLocationStrategy,
    scope: &ApplicationScope,
    entity_id: &Id,
    version: &Uuid,
    edge: &SearchEdge,
  ) -> Self {
    Self {
      index: location.write_alias.clone(),
      document_id: index_doc_id(scope, entity_id, version, edge),
    }
  }
}

/// Accumulator of index and de-index requests.
///
/// An empty batch means "nothing to do" and is never submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexOperationMessage {
  #[serde(default)]
  index_requests: Vec<IndexOperation>,
  #[serde(default)]
  de_index_requests: Vec<DeIndexOperation>,
  #[serde(default = "now_millis")]
  creation_time: i64,
}

impl IndexOperationMessage {
  pub fn new() -> Self {
    Self {
      index_requests: Vec::new(),
      de_index_requests: Vec::new(),
      creation_time: now_millis(),
    }
  }

  pub fn add_index_request(&mut self, request: IndexOperation) {
    self.index_requests.push(request);
  }

  pub fn add_de_index_request(&mut self, request: DeIndexOperation) {
    self.de_index_requests.push(request);
  }

  /// Merge another batch into this one
  pub fn ingest(&mut self, other: IndexOperationMessage) {
    self.index_requests.extend(other.index_requests);
    self.de_index_requests.extend(other.de_index_requests);
  }

  pub fn index_requests(&self) -> &[IndexOperation] {
    &self.index_requests
  }

  pub fn de_index_requests(&self) -> &[DeIndexOperation] {
    &self.de_index_requests
  }

  pub fn creation_time(&self) -> i64 {
    self.creation_time
  }

  pub fn is_empty(&self) -> bool {
    self.index_requests.is_empty() && self.de_index_requests.is_empty()
  }

  /// Total number of requests in the batch
  pub fn len(&self) -> usize {
    self.index_requests.len() + self.de_index_requests.len()
  }

  /// Distinct application ids referenced by the batch's documents
  pub fn application_ids(&self) -> Result<BTreeSet<Uuid>, InvalidDocumentId> {
    let doc_ids = self
      .index_requests
      .iter()
      .map(|r| r.document_id.as_str())
      .chain(self.de_index_requests.iter().map(|r| r.document_id.as_str()));

    let mut ids = BTreeSet::new();
    for doc_id in doc_ids {
      ids.insert(application_id_from_doc_id(doc_id)?);
    }
    Ok(ids)
  }
}
