//! Async event service
//!
//! Producers offer events to one of three queues. Workers poll those queues,
//! decode each message, dispatch it to the handler for its event kind, merge
//! every resulting batch of index operations and submit the merged batch to the
//! index in one call. Only after that submit succeeds are the messages whose
//! handlers produced a result acknowledged.
//!
//! ```text
//! POLL → DECODE+DISPATCH → AGGREGATE → SUBMIT → ACK
//! ```
//!
//! Anything that goes wrong leaves the affected messages unacknowledged, and
//! the queue's visibility timeout redelivers them. That is the only retry.
//!
//! ## Layout
//!
//! - `producer` - offering events and staging batches
//! - `dispatch` - per-message handlers and their results
//! - `resolve` - reading staged batches with quorum fallback
//! - `cycle` - aggregate, submit and ack
//! - `dead_letter` - redelivery threshold hook
//! - `worker` - the polling worker pool

mod cycle;
mod dead_letter;
mod dispatch;
mod metrics;
mod producer;
mod resolve;
mod worker;

#[cfg(test)]
mod __tests__;

use std::{sync::Arc, time::Duration};

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use self::{
  cycle::CycleOutcome,
  dead_letter::{DeadLetterSink, QueueDeadLetterSink},
  dispatch::{BatchSource, EventError, IndexEventResult},
  metrics::{Metrics, MetricsSnapshot},
  producer::OfferError,
  worker::WorkerPool,
};
use crate::{
  builder::{BuilderConfig, EventBuilder},
  domain::config::{Config, IndexProcessorConfig, QueueConfig},
  index::IndexWriter,
  queue::{QueueError, QueueManager, QueueManagerFactory, QueueMessage, QueueScope},
  staging::StagingStore,
  store::{EntityStore, GraphStore},
};

/// The three logical queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AsyncEventQueueType {
  Regular,
  Utility,
  Delete,
}

impl AsyncEventQueueType {
  pub const ALL: [Self; 3] = [Self::Regular, Self::Utility, Self::Delete];

  /// Queue names are kept short, some queue backends cap name length
  pub fn queue_name(&self) -> &'static str {
    match self {
      Self::Regular => "index",
      Self::Utility => "utility",
      Self::Delete => "delete",
    }
  }
}

impl std::fmt::Display for AsyncEventQueueType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.queue_name())
  }
}

/// Hint forwarded to the queue on send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueIndexingStrategy {
  #[default]
  Direct,
  Async,
}

impl QueueIndexingStrategy {
  pub fn is_async(&self) -> bool {
    matches!(self, Self::Async)
  }
}

/// External collaborators the service is wired to
#[derive(Clone)]
pub struct Collaborators {
  pub queues: Arc<dyn QueueManagerFactory>,
  pub entities: Arc<dyn EntityStore>,
  pub graph: Arc<dyn GraphStore>,
  pub index: Arc<dyn IndexWriter>,
  pub staging: Arc<dyn StagingStore>,
}

struct QueuePair {
  live: Arc<dyn QueueManager>,
  dead: Arc<dyn QueueManager>,
}

struct Queues {
  regular: QueuePair,
  utility: QueuePair,
  delete: QueuePair,
}

impl Queues {
  fn new(factory: &dyn QueueManagerFactory) -> Self {
    let pair = |queue_type: AsyncEventQueueType| QueuePair {
      live: factory.queue_manager(&QueueScope::new(queue_type.queue_name())),
      dead: factory.queue_manager(&QueueScope::dead_letter(queue_type.queue_name())),
    };
    Self {
      regular: pair(AsyncEventQueueType::Regular),
      utility: pair(AsyncEventQueueType::Utility),
      delete: pair(AsyncEventQueueType::Delete),
    }
  }

  fn get(&self, queue_type: AsyncEventQueueType) -> &QueuePair {
    match queue_type {
      AsyncEventQueueType::Regular => &self.regular,
      AsyncEventQueueType::Utility => &self.utility,
      AsyncEventQueueType::Delete => &self.delete,
    }
  }
}

pub struct AsyncEventService {
  queues: Queues,
  builder: EventBuilder,
  index: Arc<dyn IndexWriter>,
  staging: Arc<dyn StagingStore>,
  dead_letters: Arc<dyn DeadLetterSink>,
  config: IndexProcessorConfig,
  queue_config: QueueConfig,
  /// Applications whose index is known to exist
  initialized: Cache<Uuid, ()>,
  metrics: Metrics,
}

impl AsyncEventService {
  pub fn new(config: &Config, collaborators: Collaborators) -> Self {
    let queues = Queues::new(collaborators.queues.as_ref());
    let builder = EventBuilder::new(
      collaborators.entities,
      collaborators.graph,
      BuilderConfig::from_index_config(&config.index),
    );
    let initialized = Cache::builder()
      .time_to_live(Duration::from_secs(config.index.index_init_cache_ttl_secs))
      .build();

    Self {
      queues,
      builder,
      index: collaborators.index,
      staging: collaborators.staging,
      dead_letters: Arc::new(QueueDeadLetterSink::new(collaborators.queues)),
      config: config.index.clone(),
      queue_config: config.queue.clone(),
      initialized,
      metrics: Metrics::default(),
    }
  }

  /// Replace the default dead-letter sink
  pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
    self.dead_letters = sink;
    self
  }

  pub fn config(&self) -> &IndexProcessorConfig {
    &self.config
  }

  pub fn queue_config(&self) -> &QueueConfig {
    &self.queue_config
  }

  pub fn builder(&self) -> &EventBuilder {
    &self.builder
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.metrics.snapshot()
  }

  /// Number of workers configured for a queue
  pub fn worker_count(&self, queue_type: AsyncEventQueueType) -> usize {
    match queue_type {
      AsyncEventQueueType::Regular => self.config.worker_count,
      AsyncEventQueueType::Utility => self.config.worker_count_utility,
      AsyncEventQueueType::Delete => self.config.worker_count_delete,
    }
  }

  /// Blocking receive of up to `max-take` messages from a live queue.
  ///
  /// Received messages count as in flight until their cycle ends.
  pub fn take(&self, queue_type: AsyncEventQueueType) -> Result<Vec<QueueMessage>, QueueError> {
    let messages = self.queues.get(queue_type).live.get_messages(
      self.config.max_take(),
      self.config.visibility_timeout(),
      self.config.wait_timeout(),
    )?;
    self.metrics.received(messages.len());
    Ok(messages)
  }

  fn queue(&self, queue_type: AsyncEventQueueType) -> &Arc<dyn QueueManager> {
    &self.queues.get(queue_type).live
  }

  fn dead_queue(&self, queue_type: AsyncEventQueueType) -> &Arc<dyn QueueManager> {
    &self.queues.get(queue_type).dead
  }
}
