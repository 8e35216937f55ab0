//! Aggregate, submit and acknowledge
//!
//! Batches from one receive cycle are merged and written with a single submit.
//! If the submit fails, nothing from the cycle is acknowledged and every
//! message comes back after its visibility timeout. Index writes are
//! idempotent, so indexing twice is safe and losing an index write is not.

use std::time::Instant;

use tracing::{debug, error, trace};

use super::{AsyncEventQueueType, AsyncEventService, BatchSource, EventError, IndexEventResult};
use crate::{
  domain::{
    index::{IndexLocationStrategy, IndexOperationMessage},
    model::now_millis,
  },
  queue::QueueMessage,
};

/// What happened to one receive cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
  pub received: usize,
  pub acked: usize,
  pub deferred: usize,
  /// Whether the cycle's submit failed
  pub submit_failed: bool,
}

impl AsyncEventService {
  /// Run one cycle over messages already taken from `queue_type`
  pub fn process_cycle(&self, queue_type: AsyncEventQueueType, messages: Vec<QueueMessage>) -> CycleOutcome {
    let received = messages.len();
    let started = Instant::now();

    let results = self.call_event_handlers(queue_type, messages);
    let deferred = results.iter().filter(|result| result.is_deferred()).count();

    let outcome = match self.submit_to_index(queue_type, results) {
      Ok(to_ack) => CycleOutcome {
        received,
        acked: self.ack(queue_type, &to_ack),
        deferred,
        submit_failed: false,
      },
      Err(e) => {
        error!(queue = %queue_type, messages = received, error = %e, "Failed to submit cycle, leaving for redelivery");
        self.metrics.error();
        CycleOutcome {
          received,
          acked: 0,
          deferred: received,
          submit_failed: true,
        }
      }
    };

    self.metrics.released(received);
    debug!(
      queue = %queue_type,
      received = outcome.received,
      acked = outcome.acked,
      deferred = outcome.deferred,
      elapsed_ms = started.elapsed().as_millis() as u64,
      "Cycle complete"
    );
    outcome
  }

  /// Merge the cycle's batches, write them, and return the messages to ack.
  ///
  /// With `replicate-batches` on, batches built here are staged and sent to
  /// every region instead; only batches resolved from the staging store are
  /// written directly.
  pub fn submit_to_index(
    &self,
    queue_type: AsyncEventQueueType,
    results: Vec<IndexEventResult>,
  ) -> Result<Vec<QueueMessage>, EventError> {
    let mut local = IndexOperationMessage::new();
    let mut staged = IndexOperationMessage::new();
    let mut to_ack = Vec::with_capacity(results.len());

    let now = now_millis();
    for result in results {
      let Some(message) = result.message else {
        continue;
      };

      self.metrics.cycle_latency(now.saturating_sub(result.creation_time));
      if let Some(batch) = result.batch {
        match result.source {
          BatchSource::Local => local.ingest(batch),
          BatchSource::Staged => staged.ingest(batch),
        }
      }
      to_ack.push(message);
    }

    if self.config.replicate_batches {
      self.queue_index_operation_message(&local, queue_type)?;
      self.submit(&staged)?;
    } else {
      local.ingest(staged);
      self.submit(&local)?;
    }

    Ok(to_ack)
  }

  fn submit(&self, batch: &IndexOperationMessage) -> Result<(), EventError> {
    if batch.is_empty() {
      trace!("Nothing to submit");
      return Ok(());
    }

    self.index.submit(batch)?;
    self.metrics.submitted();
    debug!(requests = batch.len(), "Submitted batch");
    Ok(())
  }

  /// Make sure every application referenced by the batch has an index.
  ///
  /// Runs per message before aggregation, so a batch with a bad document id or
  /// an index that cannot be created only defers its own message. Ids are
  /// distinct per batch, and applications initialized recently are skipped.
  pub(super) fn initialize_entity_indexes(&self, batch: &IndexOperationMessage) -> Result<(), EventError> {
    for application_id in batch.application_ids()? {
      if self.initialized.contains_key(&application_id) {
        continue;
      }

      let location = IndexLocationStrategy::for_application(&self.config.index_prefix, application_id);
      self.index.ensure_index(&location)?;
      self.initialized.insert(application_id, ());
      debug!(%application_id, "Initialized application index");
    }
    Ok(())
  }

  /// Commit each message, logging and continuing past failures. Returns the
  /// number committed.
  fn ack(&self, queue_type: AsyncEventQueueType, messages: &[QueueMessage]) -> usize {
    let queue = self.queue(queue_type);
    let mut acked = 0;

    for message in messages {
      match queue.commit_message(message) {
        Ok(()) => {
          acked += 1;
          self.metrics.acked();
        }
        Err(e) => {
          error!(message_id = %message.message_id, error = %e, "Continuing after error acking message");
        }
      }
    }
    acked
  }
}
