//! Queue abstraction
//!
//! A durable, at-least-once message channel. Receiving a message hides it from
//! other consumers for a visibility timeout; a message that is not committed
//! within that window is delivered again. Redelivery is the only retry mechanism
//! the indexing service relies on.
//!
//! Bodies are opaque strings: encoding and decoding events is the caller's job,
//! so a body that fails to decode is still a normal queue message that can be
//! left to redeliver or dead-lettered.

mod memory;

use std::{fmt, sync::Arc, time::Duration};

pub use memory::{InMemoryQueue, InMemoryQueueFabric, InMemoryQueueFactory, InMemoryQueueManager};

/// Identifies a logical queue
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueScope {
  pub name: String,
  /// The dead-letter companion of `name`
  pub dead_letter: bool,
}

impl QueueScope {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      dead_letter: false,
    }
  }

  pub fn dead_letter(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      dead_letter: true,
    }
  }

  /// Physical queue name
  pub fn queue_name(&self) -> String {
    if self.dead_letter {
      format!("{}_dead", self.name)
    } else {
      self.name.clone()
    }
  }
}

impl fmt::Display for QueueScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.queue_name())
  }
}

/// A received message, valid for one processing cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
  pub message_id: String,
  /// Identifies this particular delivery; commits with a stale handle fail
  pub receipt_handle: String,
  pub body: String,
  /// How many times the message has been received, including this delivery
  pub receive_count: u32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
  #[error("Queue transport error: {0}")]
  Transport(String),
  #[error("Queue not available: {0}")]
  Unavailable(String),
  #[error("Unknown or expired receipt for message {0}")]
  InvalidReceipt(String),
}

/// Contract the indexing service consumes.
///
/// All calls are blocking; the service runs them on blocking threads.
pub trait QueueManager: Send + Sync {
  /// Enqueue to this region's queue. `is_async` hints that the sender does not
  /// need to wait for the send to be durable.
  fn send_message(&self, body: &str, is_async: bool) -> Result<(), QueueError>;

  fn send_messages(&self, bodies: &[String]) -> Result<(), QueueError>;

  /// Enqueue to this queue in every region
  fn send_message_to_topic(&self, body: &str) -> Result<(), QueueError>;

  /// Long-poll for up to `max_count` messages, waiting at most `wait_timeout`
  /// for the first one. Returned messages are hidden for `visibility_timeout`.
  fn get_messages(
    &self,
    max_count: usize,
    visibility_timeout: Duration,
    wait_timeout: Duration,
  ) -> Result<Vec<QueueMessage>, QueueError>;

  /// Permanently remove a message. Only call once its work is durably done.
  fn commit_message(&self, message: &QueueMessage) -> Result<(), QueueError>;

  fn commit_messages(&self, messages: &[QueueMessage]) -> Result<(), QueueError> {
    for message in messages {
      self.commit_message(message)?;
    }
    Ok(())
  }

  /// Approximate backlog size
  fn queue_depth(&self) -> Result<u64, QueueError>;
}

pub trait QueueManagerFactory: Send + Sync {
  fn queue_manager(&self, scope: &QueueScope) -> Arc<dyn QueueManager>;
}
