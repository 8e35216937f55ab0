//! Producer side: offering events to the queues
//!
//! Every call here runs after the primary write already succeeded. A failure
//! means the indexing side effect is lost or delayed, never that the write is
//! rolled back, so callers surface [`OfferError`] and move on.

use tracing::trace;
use uuid::Uuid;

use super::{AsyncEventQueueType, AsyncEventService, QueueIndexingStrategy};
use crate::{
  builder::BuildError,
  domain::{
    event::{AsyncEvent, EventKind},
    index::IndexOperationMessage,
    model::{ApplicationScope, Edge, EdgeScope, Entity, EntityIdScope, Id},
  },
  queue::QueueError,
  staging::StagingError,
};

#[derive(Debug, thiserror::Error)]
pub enum OfferError {
  #[error("Unable to queue message: {0}")]
  Queue(#[from] QueueError),
  #[error("Unable to serialize message: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("Unable to stage batch: {0}")]
  Staging(#[from] StagingError),
  #[error("Unable to build batch: {0}")]
  Build(#[from] BuildError),
}

impl AsyncEventService {
  fn event(&self, kind: EventKind) -> AsyncEvent {
    AsyncEvent::new(self.queue_config.primary_region.clone(), kind)
  }

  /// Send to this region only
  fn offer(
    &self,
    event: &AsyncEvent,
    queue_type: AsyncEventQueueType,
    strategy: QueueIndexingStrategy,
  ) -> Result<(), OfferError> {
    let body = event.to_json()?;
    self.queue(queue_type).send_message(&body, strategy.is_async())?;
    trace!(queue = %queue_type, event = event.name(), "Offered event");
    Ok(())
  }

  /// Send to every region
  fn offer_topic(&self, event: &AsyncEvent, queue_type: AsyncEventQueueType) -> Result<(), OfferError> {
    let body = event.to_json()?;
    self.queue(queue_type).send_message_to_topic(&body)?;
    trace!(queue = %queue_type, event = event.name(), "Offered event to topic");
    Ok(())
  }

  fn offer_batch(&self, events: &[AsyncEvent], queue_type: AsyncEventQueueType) -> Result<(), OfferError> {
    let bodies = events.iter().map(AsyncEvent::to_json).collect::<Result<Vec<_>, _>>()?;
    self.queue(queue_type).send_messages(&bodies)?;
    trace!(queue = %queue_type, count = bodies.len(), "Offered event batch");
    Ok(())
  }

  /// Ask every region to create the application's index
  pub fn queue_initialize_application_index(&self, scope: &ApplicationScope) -> Result<(), OfferError> {
    let location = self.builder.location(scope);
    trace!(application = %scope.application_id(), "Offering initialize application index");
    self.offer_topic(
      &self.event(EventKind::InitializeApplicationIndex { location }),
      AsyncEventQueueType::Regular,
    )
  }

  pub fn queue_entity_index_update(
    &self,
    scope: &ApplicationScope,
    entity: &Entity,
    updated_after: i64,
    strategy: QueueIndexingStrategy,
  ) -> Result<(), OfferError> {
    let event = self.event(EventKind::EntityIndexUpdate {
      entity_id_scope: EntityIdScope::new(scope.clone(), entity.id.clone()),
      updated_after,
    });
    self.offer(&event, AsyncEventQueueType::Regular, strategy)
  }

  pub fn queue_new_edge(
    &self,
    scope: &ApplicationScope,
    entity_id: &Id,
    edge: &Edge,
    strategy: QueueIndexingStrategy,
  ) -> Result<(), OfferError> {
    let event = self.event(EventKind::NewEdge {
      application_scope: scope.clone(),
      entity_id: entity_id.clone(),
      edge: edge.clone(),
    });
    self.offer(&event, AsyncEventQueueType::Regular, strategy)
  }

  /// Edge deletes stay in-region; the structural delete happens here and the
  /// resulting de-index fans out separately
  pub fn queue_delete_edge(&self, scope: &ApplicationScope, edge: &Edge) -> Result<(), OfferError> {
    let event = self.event(EventKind::EdgeDelete {
      application_scope: scope.clone(),
      edge: edge.clone(),
    });
    self.offer(&event, AsyncEventQueueType::Delete, QueueIndexingStrategy::Direct)
  }

  pub fn queue_entity_delete(&self, scope: &ApplicationScope, entity_id: &Id) -> Result<(), OfferError> {
    let event = self.event(EventKind::EntityDelete {
      entity_id_scope: EntityIdScope::new(scope.clone(), entity_id.clone()),
      is_collection_delete: false,
      updated_before: i64::MAX,
    });
    self.offer(&event, AsyncEventQueueType::Delete, QueueIndexingStrategy::Direct)
  }

  /// Old-version cleanup runs in every region
  pub fn queue_de_index_old_version(
    &self,
    scope: &ApplicationScope,
    entity_id: &Id,
    marked_version: Uuid,
  ) -> Result<(), OfferError> {
    let event = self.event(EventKind::DeIndexOldVersions {
      entity_id_scope: EntityIdScope::new(scope.clone(), entity_id.clone()),
      marked_version,
    });
    self.offer_topic(&event, AsyncEventQueueType::Delete)
  }

  /// Stage a batch and offer a reference to it on the topic, so every region
  /// indexes the same batch.
  ///
  /// Empty batches are dropped and return `None`.
  pub fn queue_index_operation_message(
    &self,
    batch: &IndexOperationMessage,
    queue_type: AsyncEventQueueType,
  ) -> Result<Option<Uuid>, OfferError> {
    if batch.is_empty() {
      return Ok(None);
    }

    let batch_id = Uuid::now_v7();
    let body = serde_json::to_string(batch)?;
    self
      .staging
      .put_string(&batch_id.to_string(), &body, self.config.index_message_ttl_secs())?;

    trace!(%batch_id, requests = batch.len(), "Offering index batch reference");
    self.offer_topic(&self.event(EventKind::IndexBatchReference { batch_id }), queue_type)?;
    Ok(Some(batch_id))
  }

  /// Build an entity's batch now and hand it to every region
  pub fn index(&self, scope: &ApplicationScope, entity_id: &Id, updated_since: i64) -> Result<(), OfferError> {
    if let Some(batch) = self.builder.build_entity_index(scope, entity_id, updated_since)? {
      self.queue_index_operation_message(&batch, AsyncEventQueueType::Regular)?;
    }
    Ok(())
  }

  /// Queue an index update for the target of every edge
  pub fn index_batch(
    &self,
    edges: &[EdgeScope],
    updated_since: i64,
    queue_type: AsyncEventQueueType,
  ) -> Result<(), OfferError> {
    let events: Vec<AsyncEvent> = edges
      .iter()
      .map(|scope| {
        self.event(EventKind::EntityIndexUpdate {
          entity_id_scope: EntityIdScope::new(scope.application_scope.clone(), scope.edge.target.clone()),
          updated_after: updated_since,
        })
      })
      .collect();
    self.offer_batch(&events, queue_type)
  }

  /// Queue a collection delete for the target of every edge
  pub fn delete_batch(
    &self,
    edges: &[EdgeScope],
    updated_before: i64,
    queue_type: AsyncEventQueueType,
  ) -> Result<(), OfferError> {
    let events: Vec<AsyncEvent> = edges
      .iter()
      .map(|scope| {
        self.event(EventKind::EntityDelete {
          entity_id_scope: EntityIdScope::new(scope.application_scope.clone(), scope.edge.target.clone()),
          is_collection_delete: true,
          updated_before,
        })
      })
      .collect();
    self.offer_batch(&events, queue_type)
  }

  /// Approximate backlog of a live queue
  pub fn queue_depth(&self, queue_type: AsyncEventQueueType) -> Result<u64, QueueError> {
    self.queue(queue_type).queue_depth()
  }
}
