//! Primary-store model types
//!
//! These are the identifying types carried by events (scopes and ids) and the
//! minimal entity/edge/version shapes the event builder reads back from the
//! primary store. Events never carry full entities, only ids.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Name of the entity field holding the last-modified timestamp (epoch millis)
pub const PROPERTY_MODIFIED: &str = "modified";

/// Entity type used for application (tenant) ids
pub const APPLICATION_TYPE: &str = "application";

/// A typed entity identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id {
  pub uuid: Uuid,
  #[serde(rename = "type")]
  pub kind: String,
}

impl Id {
  pub fn new(uuid: Uuid, kind: impl Into<String>) -> Self {
    Self {
      uuid,
      kind: kind.into(),
    }
  }

  /// Create an id with a fresh time-ordered uuid
  pub fn generate(kind: impl Into<String>) -> Self {
    Self::new(Uuid::now_v7(), kind)
  }
}

impl fmt::Display for Id {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.kind, self.uuid)
  }
}

/// The tenant partition an operation applies to.
///
/// The originating region travels on the event envelope, so together with
/// `source_region` this forms the (application, region) pair of a tenant's data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationScope {
  pub application: Id,
}

impl ApplicationScope {
  pub fn new(application: Id) -> Self {
    Self { application }
  }

  pub fn from_application_id(application_id: Uuid) -> Self {
    Self::new(Id::new(application_id, APPLICATION_TYPE))
  }

  pub fn application_id(&self) -> Uuid {
    self.application.uuid
  }
}

impl fmt::Display for ApplicationScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "app({})", self.application.uuid)
  }
}

/// An entity id together with the application it lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityIdScope {
  pub application_scope: ApplicationScope,
  pub id: Id,
}

impl EntityIdScope {
  pub fn new(application_scope: ApplicationScope, id: Id) -> Self {
    Self { application_scope, id }
  }
}

/// The current state of an entity as loaded from the primary store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
  pub id: Id,
  pub version: Uuid,
  #[serde(default)]
  pub fields: Map<String, Value>,
}

impl Entity {
  pub fn new(id: Id, version: Uuid) -> Self {
    Self {
      id,
      version,
      fields: Map::new(),
    }
  }

  pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.fields.insert(name.into(), value.into());
    self
  }

  pub fn with_modified(self, modified: i64) -> Self {
    self.with_field(PROPERTY_MODIFIED, modified)
  }

  /// Last-modified timestamp, if the entity carries one
  pub fn modified(&self) -> Option<i64> {
    self.fields.get(PROPERTY_MODIFIED).and_then(Value::as_i64)
  }
}

/// A directed graph edge between two entities
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
  pub source: Id,
  pub edge_type: String,
  pub target: Id,
  /// Edge write timestamp (epoch millis)
  pub timestamp: i64,
}

impl Edge {
  pub fn new(source: Id, edge_type: impl Into<String>, target: Id, timestamp: i64) -> Self {
    Self {
      source,
      edge_type: edge_type.into(),
      target,
      timestamp,
    }
  }
}

impl fmt::Display for Edge {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} -[{}]-> {}", self.source, self.edge_type, self.target)
  }
}

/// An edge together with the application it lives in
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeScope {
  pub application_scope: ApplicationScope,
  pub edge: Edge,
}

impl EdgeScope {
  pub fn new(application_scope: ApplicationScope, edge: Edge) -> Self {
    Self { application_scope, edge }
  }
}

/// State recorded in the version log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MvccState {
  Complete,
  Deleted,
}

/// One entry of an entity's version log.
///
/// Versions are v7 uuids, so `Ord` on the uuid is version order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MvccLogEntry {
  pub entity_id: Id,
  pub version: Uuid,
  pub state: MvccState,
}

impl MvccLogEntry {
  pub fn new(entity_id: Id, version: Uuid, state: MvccState) -> Self {
    Self {
      entity_id,
      version,
      state,
    }
  }

  pub fn is_deleted(&self) -> bool {
    self.state == MvccState::Deleted
  }
}

/// Current wall-clock time in epoch millis
pub fn now_millis() -> i64 {
  chrono::Utc::now().timestamp_millis()
}
