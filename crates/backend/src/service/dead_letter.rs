//! Dead letters
//!
//! Without `max-receive-count` a message that never succeeds is redelivered
//! forever. With it, a message received more often than the threshold is handed
//! to a [`DeadLetterSink`] and acknowledged on the live queue once the sink has
//! taken it.

use std::{sync::Arc, time::Duration};

use tracing::{info, warn};

use super::{AsyncEventQueueType, AsyncEventService};
use crate::queue::{QueueError, QueueManagerFactory, QueueMessage, QueueScope};

pub trait DeadLetterSink: Send + Sync {
  /// Take ownership of a message. An error leaves it on the live queue.
  fn accept(&self, queue_type: AsyncEventQueueType, message: &QueueMessage) -> Result<(), QueueError>;
}

/// Forwards dead letters to the `{queue}_dead` queue
pub struct QueueDeadLetterSink {
  queues: Arc<dyn QueueManagerFactory>,
}

impl QueueDeadLetterSink {
  pub fn new(queues: Arc<dyn QueueManagerFactory>) -> Self {
    Self { queues }
  }
}

impl DeadLetterSink for QueueDeadLetterSink {
  fn accept(&self, queue_type: AsyncEventQueueType, message: &QueueMessage) -> Result<(), QueueError> {
    self
      .queues
      .queue_manager(&QueueScope::dead_letter(queue_type.queue_name()))
      .send_message(&message.body, false)
  }
}

impl AsyncEventService {
  /// Move every message on a dead-letter queue back to its live queue.
  ///
  /// Messages are committed on the dead-letter queue only after the send
  /// succeeded. Returns the number of messages moved.
  pub fn redrive_dead_letters(&self, queue_type: AsyncEventQueueType) -> Result<usize, QueueError> {
    let dead = self.dead_queue(queue_type);
    let live = self.queue(queue_type);
    let mut moved = 0;

    loop {
      let messages = dead.get_messages(self.config.max_take(), self.config.visibility_timeout(), Duration::ZERO)?;
      if messages.is_empty() {
        break;
      }

      let bodies: Vec<String> = messages.iter().map(|message| message.body.clone()).collect();
      live.send_messages(&bodies)?;

      for message in &messages {
        if let Err(e) = dead.commit_message(message) {
          warn!(message_id = %message.message_id, error = %e, "Failed to remove redriven dead letter");
        }
      }
      moved += messages.len();
    }

    info!(queue = %queue_type, moved, "Redrove dead letters");
    Ok(moved)
  }
}
