//! In-memory primary store

use std::collections::HashSet;

use dashmap::DashMap;
use uuid::Uuid;

use super::{EntityStore, GraphStore, StoreError};
use crate::domain::model::{ApplicationScope, Edge, Entity, Id, MvccLogEntry, MvccState};

#[derive(Debug, Default)]
struct EntityRecord {
  /// Oldest first
  log: Vec<(MvccLogEntry, Option<Entity>)>,
}

/// Versioned entity store keyed by (application, entity id)
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
  records: DashMap<(Uuid, Id), EntityRecord>,
}

impl InMemoryEntityStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Write a new version of `entity`, returning it with its assigned version
  pub fn write(&self, scope: &ApplicationScope, mut entity: Entity) -> Entity {
    entity.version = Uuid::now_v7();
    let entry = MvccLogEntry::new(entity.id.clone(), entity.version, MvccState::Complete);

    self
      .records
      .entry((scope.application_id(), entity.id.clone()))
      .or_default()
      .log
      .push((entry, Some(entity.clone())));
    entity
  }

  /// Number of log entries kept for an entity
  pub fn version_count(&self, scope: &ApplicationScope, id: &Id) -> usize {
    self
      .records
      .get(&(scope.application_id(), id.clone()))
      .map_or(0, |record| record.log.len())
  }
}

impl EntityStore for InMemoryEntityStore {
  fn load(&self, scope: &ApplicationScope, id: &Id) -> Result<Option<Entity>, StoreError> {
    let Some(record) = self.records.get(&(scope.application_id(), id.clone())) else {
      return Ok(None);
    };

    Ok(record.log.last().and_then(|(_, entity)| entity.clone()))
  }

  fn versions(&self, scope: &ApplicationScope, id: &Id) -> Result<Vec<MvccLogEntry>, StoreError> {
    Ok(
      self
        .records
        .get(&(scope.application_id(), id.clone()))
        .map(|record| record.log.iter().rev().map(|(entry, _)| entry.clone()).collect())
        .unwrap_or_default(),
    )
  }

  fn delete_versions(&self, scope: &ApplicationScope, entries: &[MvccLogEntry]) -> Result<(), StoreError> {
    for entry in entries {
      if let Some(mut record) = self.records.get_mut(&(scope.application_id(), entry.entity_id.clone())) {
        record.log.retain(|(existing, _)| existing.version != entry.version);
      }
    }
    Ok(())
  }

  fn mark(&self, scope: &ApplicationScope, id: &Id) -> Result<(), StoreError> {
    let entry = MvccLogEntry::new(id.clone(), Uuid::now_v7(), MvccState::Deleted);
    self
      .records
      .entry((scope.application_id(), id.clone()))
      .or_default()
      .log
      .push((entry, None));
    Ok(())
  }
}

/// Edge store keyed by application
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
  edges: DashMap<Uuid, Vec<Edge>>,
  marked: DashMap<Uuid, HashSet<Id>>,
}

impl InMemoryGraphStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Write an edge; writing the same edge twice keeps one copy
  pub fn write_edge(&self, scope: &ApplicationScope, edge: Edge) {
    let mut edges = self.edges.entry(scope.application_id()).or_default();
    if !edges.contains(&edge) {
      edges.push(edge);
    }
  }

  pub fn edge_count(&self, scope: &ApplicationScope) -> usize {
    self.edges.get(&scope.application_id()).map_or(0, |edges| edges.len())
  }
}

impl GraphStore for InMemoryGraphStore {
  fn edges_to_target(&self, scope: &ApplicationScope, target: &Id) -> Result<Vec<Edge>, StoreError> {
    Ok(
      self
        .edges
        .get(&scope.application_id())
        .map(|edges| edges.iter().filter(|edge| &edge.target == target).cloned().collect())
        .unwrap_or_default(),
    )
  }

  fn delete_edge(&self, scope: &ApplicationScope, edge: &Edge) -> Result<Option<Edge>, StoreError> {
    let Some(mut edges) = self.edges.get_mut(&scope.application_id()) else {
      return Ok(None);
    };

    match edges.iter().position(|existing| existing == edge) {
      Some(index) => Ok(Some(edges.remove(index))),
      None => Ok(None),
    }
  }

  fn mark_node(&self, scope: &ApplicationScope, node: &Id, _timestamp: i64) -> Result<(), StoreError> {
    self.marked.entry(scope.application_id()).or_default().insert(node.clone());
    Ok(())
  }

  fn compact_node(&self, scope: &ApplicationScope, node: &Id) -> Result<Vec<Edge>, StoreError> {
    let is_marked = self
      .marked
      .get(&scope.application_id())
      .is_some_and(|marked| marked.contains(node));
    if !is_marked {
      return Ok(Vec::new());
    }

    let removed = match self.edges.get_mut(&scope.application_id()) {
      Some(mut edges) => {
        let (removed, kept): (Vec<Edge>, Vec<Edge>) = edges
          .drain(..)
          .partition(|edge| &edge.source == node || &edge.target == node);
        *edges = kept;
        removed
      }
      None => Vec::new(),
    };

    if let Some(mut marked) = self.marked.get_mut(&scope.application_id()) {
      marked.remove(node);
    }

    Ok(removed)
  }
}
