//! In-memory search index

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use serde_json::{Map, Value};

use super::{IndexError, IndexWriter};
use crate::domain::index::{IndexLocationStrategy, IndexOperationMessage};

/// Document store keyed by (write alias, document id).
///
/// Index requests upsert, de-index requests remove, so replaying a batch is a
/// no-op. In strict mode a write to an alias that was never ensured fails.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
  documents: DashMap<(String, String), Map<String, Value>>,
  indexes: DashMap<String, IndexLocationStrategy>,
  strict: bool,
  submits: AtomicUsize,
  ensures: AtomicUsize,
  fail_submits: AtomicBool,
}

impl InMemoryIndex {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject writes to aliases that were not ensured first
  pub fn strict() -> Self {
    Self {
      strict: true,
      ..Self::default()
    }
  }

  /// Make every following submit fail until switched back
  pub fn set_failing(&self, failing: bool) {
    self.fail_submits.store(failing, Ordering::SeqCst);
  }

  pub fn document(&self, index: &str, document_id: &str) -> Option<Map<String, Value>> {
    self
      .documents
      .get(&(index.to_string(), document_id.to_string()))
      .map(|doc| doc.value().clone())
  }

  /// Document ids in `index`, sorted
  pub fn document_ids(&self, index: &str) -> Vec<String> {
    let mut ids: Vec<String> = self
      .documents
      .iter()
      .filter(|entry| entry.key().0 == index)
      .map(|entry| entry.key().1.clone())
      .collect();
    ids.sort();
    ids
  }

  pub fn document_count(&self) -> usize {
    self.documents.len()
  }

  pub fn has_index(&self, write_alias: &str) -> bool {
    self.indexes.contains_key(write_alias)
  }

  /// Successful submit calls
  pub fn submit_count(&self) -> usize {
    self.submits.load(Ordering::SeqCst)
  }

  /// ensure_index calls, including repeats
  pub fn ensure_count(&self) -> usize {
    self.ensures.load(Ordering::SeqCst)
  }
}

impl IndexWriter for InMemoryIndex {
  fn submit(&self, batch: &IndexOperationMessage) -> Result<(), IndexError> {
    if self.fail_submits.load(Ordering::SeqCst) {
      return Err(IndexError::Unavailable("submit failures enabled".into()));
    }

    if self.strict {
      let missing = batch
        .index_requests()
        .iter()
        .map(|r| &r.index)
        .chain(batch.de_index_requests().iter().map(|r| &r.index))
        .find(|index| !self.indexes.contains_key(index.as_str()));
      if let Some(index) = missing {
        return Err(IndexError::MissingIndex(index.clone()));
      }
    }

    for request in batch.index_requests() {
      self.documents.insert(
        (request.index.clone(), request.document_id.clone()),
        request.document.clone(),
      );
    }
    for request in batch.de_index_requests() {
      self
        .documents
        .remove(&(request.index.clone(), request.document_id.clone()));
    }

    self.submits.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn ensure_index(&self, location: &IndexLocationStrategy) -> Result<(), IndexError> {
    self.ensures.fetch_add(1, Ordering::SeqCst);
    self
      .indexes
      .entry(location.write_alias.clone())
      .or_insert_with(|| location.clone());
    Ok(())
  }
}
