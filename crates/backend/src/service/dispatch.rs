//! Decode and dispatch
//!
//! Each received message becomes one [`IndexEventResult`]. A result that keeps
//! its queue message will be acknowledged once the cycle's batch is submitted;
//! a result without one is deferred to redelivery. Handler failures only ever
//! affect their own message.

use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{AsyncEventQueueType, AsyncEventService, producer::OfferError};
use crate::{
  builder::BuildError,
  domain::{
    event::{AsyncEvent, EventKind},
    index::{IndexOperationMessage, InvalidDocumentId},
    model::now_millis,
  },
  index::IndexError,
  queue::{QueueError, QueueMessage},
  staging::StagingError,
};

#[derive(Debug, thiserror::Error)]
pub enum EventError {
  #[error("Failed to decode event: {0}")]
  Decode(#[from] serde_json::Error),
  /// Expected replication lag, retried by redelivery without alarm
  #[error("Staged batch {0} not visible yet")]
  NotYetVisible(Uuid),
  #[error("Staged batch {0} not found when reading with strong consistency")]
  BatchLost(Uuid),
  #[error("Staged batch {batch_id} is not a valid batch: {source}")]
  InvalidBatch {
    batch_id: Uuid,
    #[source]
    source: serde_json::Error,
  },
  #[error("Build error: {0}")]
  Build(#[from] BuildError),
  #[error("Index error: {0}")]
  Index(#[from] IndexError),
  #[error("Staging error: {0}")]
  Staging(#[from] StagingError),
  #[error("Queue error: {0}")]
  Queue(#[from] QueueError),
  #[error("Offer error: {0}")]
  Offer(#[from] OfferError),
  #[error("{0}")]
  InvalidDocument(#[from] InvalidDocumentId),
}

/// Where a result's batch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSource {
  /// Built here from a source event
  Local,
  /// Read back from the staging store
  Staged,
}

/// Outcome of handling one message
#[derive(Debug)]
pub struct IndexEventResult {
  pub batch: Option<IndexOperationMessage>,
  pub source: BatchSource,
  /// Present only when the message should be acknowledged
  pub message: Option<QueueMessage>,
  pub creation_time: i64,
}

impl IndexEventResult {
  fn processed(message: QueueMessage, batch: Option<IndexOperationMessage>, source: BatchSource, creation_time: i64) -> Self {
    Self {
      batch,
      source,
      message: Some(message),
      creation_time,
    }
  }

  fn deferred(creation_time: i64) -> Self {
    Self {
      batch: None,
      source: BatchSource::Local,
      message: None,
      creation_time,
    }
  }

  pub fn is_deferred(&self) -> bool {
    self.message.is_none()
  }
}

impl AsyncEventService {
  /// Handle every message of a receive cycle
  pub fn call_event_handlers(
    &self,
    queue_type: AsyncEventQueueType,
    messages: Vec<QueueMessage>,
  ) -> Vec<IndexEventResult> {
    debug!(queue = %queue_type, count = messages.len(), "Calling event handlers");
    messages
      .into_iter()
      .map(|message| self.call_event_handler(queue_type, message))
      .collect()
  }

  fn call_event_handler(&self, queue_type: AsyncEventQueueType, message: QueueMessage) -> IndexEventResult {
    if let Some(max) = self.config.max_receive_count
      && message.receive_count > max
    {
      return self.dead_letter(queue_type, message);
    }

    let event = match AsyncEvent::from_json(&message.body) {
      Ok(event) => event,
      Err(e) => {
        error!(message_id = %message.message_id, error = %e, "Failed to decode event, leaving for redelivery");
        self.metrics.error();
        return IndexEventResult::deferred(now_millis());
      }
    };

    let creation_time = event.creation_time;
    let handled = self.handle_event(&event).and_then(|(batch, source)| {
      if let Some(batch) = &batch
        && self.submits_locally(source)
      {
        self.initialize_entity_indexes(batch)?;
      }
      Ok((batch, source))
    });

    match handled {
      Ok((batch, source)) => {
        debug!(
          message_id = %message.message_id,
          event = event.name(),
          requests = batch.as_ref().map_or(0, IndexOperationMessage::len),
          "Handled event"
        );
        IndexEventResult::processed(message, batch, source, creation_time)
      }
      Err(EventError::NotYetVisible(batch_id)) => {
        debug!(message_id = %message.message_id, %batch_id, "Deferring event until staged batch is visible");
        self.metrics.deferred();
        IndexEventResult::deferred(creation_time)
      }
      Err(e) => {
        error!(
          message_id = %message.message_id,
          event = event.name(),
          receive_count = message.receive_count,
          error = %e,
          "Failed to handle event"
        );
        self.metrics.error();
        IndexEventResult::deferred(creation_time)
      }
    }
  }

  fn handle_event(&self, event: &AsyncEvent) -> Result<(Option<IndexOperationMessage>, BatchSource), EventError> {
    let batch = match &event.kind {
      EventKind::EntityIndexUpdate {
        entity_id_scope,
        updated_after,
      } => self
        .builder
        .build_entity_index(&entity_id_scope.application_scope, &entity_id_scope.id, *updated_after)?,

      EventKind::NewEdge {
        application_scope,
        entity_id,
        edge,
      } => Some(self.builder.build_new_edge(application_scope, entity_id, edge)?),

      EventKind::EdgeDelete { application_scope, edge } => {
        Some(self.builder.build_delete_edge(application_scope, edge)?)
      }

      EventKind::EntityDelete {
        entity_id_scope,
        is_collection_delete,
        updated_before,
      } => {
        let result = self.builder.build_entity_delete(
          &entity_id_scope.application_scope,
          &entity_id_scope.id,
          *is_collection_delete,
          *updated_before,
        )?;
        let mut batch = result.de_index;
        batch.ingest(result.compaction.run()?);
        Some(batch)
      }

      EventKind::DeIndexOldVersions {
        entity_id_scope,
        marked_version,
      } => Some(self.builder.de_index_old_versions(
        &entity_id_scope.application_scope,
        &entity_id_scope.id,
        *marked_version,
      )?),

      EventKind::InitializeApplicationIndex { location } => {
        self.index.ensure_index(location)?;
        self.initialized.insert(location.application_id, ());
        None
      }

      EventKind::IndexBatchReference { batch_id } => {
        let batch = self.resolve_staged_batch(*batch_id, event.creation_time)?;
        return Ok((batch, BatchSource::Staged));
      }
    };

    Ok((batch, BatchSource::Local))
  }

  /// Whether a batch from `source` is written by this cycle rather than staged
  fn submits_locally(&self, source: BatchSource) -> bool {
    source == BatchSource::Staged || !self.config.replicate_batches
  }

  /// Hand a message that exceeded the receive threshold to the dead-letter sink
  fn dead_letter(&self, queue_type: AsyncEventQueueType, message: QueueMessage) -> IndexEventResult {
    match self.dead_letters.accept(queue_type, &message) {
      Ok(()) => {
        warn!(
          queue = %queue_type,
          message_id = %message.message_id,
          receive_count = message.receive_count,
          "Message exceeded receive limit, moved to dead letters"
        );
        self.metrics.dead_lettered();
        IndexEventResult::processed(message, None, BatchSource::Local, now_millis())
      }
      Err(e) => {
        error!(message_id = %message.message_id, error = %e, "Failed to dead-letter message");
        self.metrics.error();
        IndexEventResult::deferred(now_millis())
      }
    }
  }
}
