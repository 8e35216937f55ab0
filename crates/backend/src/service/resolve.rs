//! Staged batch resolution
//!
//! A reference event points at a batch in the staging store. The cheap
//! eventually-consistent read is tried first. A miss shortly after the
//! reference was created is expected replication lag and defers the message;
//! once the local quorum window has passed the read escalates to a quorum read,
//! and a miss there means the batch is gone.

use tracing::{debug, error, warn};
use uuid::Uuid;

use super::{AsyncEventService, EventError};
use crate::domain::{index::IndexOperationMessage, model::now_millis};

impl AsyncEventService {
  /// Resolve a staged batch.
  ///
  /// `Ok(None)` means the message should be dropped: only returned when quorum
  /// fallback is off and the batch never arrived within the map message timeout.
  pub(super) fn resolve_staged_batch(
    &self,
    batch_id: Uuid,
    creation_time: i64,
  ) -> Result<Option<IndexOperationMessage>, EventError> {
    let key = batch_id.to_string();

    let body = match self.staging.get_string(&key)? {
      Some(body) => body,
      None => {
        let elapsed = now_millis().saturating_sub(creation_time);
        let past_quorum_window = elapsed > self.queue_config.local_quorum_timeout_ms as i64;

        if self.queue_config.quorum_fallback && past_quorum_window {
          debug!(%batch_id, elapsed, "Staged batch not found, reading with strong consistency");
          self
            .staging
            .get_string_high_consistency(&key)?
            .ok_or(EventError::BatchLost(batch_id))?
        } else if !self.queue_config.quorum_fallback && elapsed > self.queue_config.map_message_timeout_ms as i64 {
          error!(%batch_id, elapsed, "Staged batch never received, removing message from queue");
          return Ok(None);
        } else {
          if self.queue_config.quorum_fallback {
            debug!(%batch_id, elapsed, "Staged batch not visible yet");
          } else {
            warn!(%batch_id, elapsed, "Staged batch not received yet");
          }
          return Err(EventError::NotYetVisible(batch_id));
        }
      }
    };

    let batch: IndexOperationMessage =
      serde_json::from_str(&body).map_err(|source| EventError::InvalidBatch { batch_id, source })?;

    if batch.is_empty() {
      debug!(%batch_id, "Staged batch is empty");
    }
    Ok(Some(batch))
  }
}
