//! In-memory queue implementation
//!
//! Models the behaviour the indexing service depends on: FIFO-ish delivery,
//! visibility timeouts with redelivery, receive counts, long-poll receives and
//! region fan-out for topic sends. Every (region, queue name) pair gets one
//! shared [`InMemoryQueue`] inside an [`InMemoryQueueFabric`].

use std::{
  collections::VecDeque,
  sync::Arc,
  time::{Duration, Instant},
};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::trace;
use uuid::Uuid;

use super::{QueueError, QueueManager, QueueManagerFactory, QueueMessage, QueueScope};

#[derive(Debug)]
struct StoredMessage {
  message_id: String,
  body: String,
  receive_count: u32,
  invisible_until: Option<Instant>,
  receipt_handle: Option<String>,
}

impl StoredMessage {
  fn is_visible(&self, now: Instant) -> bool {
    self.invisible_until.is_none_or(|until| until <= now)
  }
}

/// Far enough out to never be reached by a running process
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn saturating_add(at: Instant, duration: Duration) -> Instant {
  at.checked_add(duration)
    .or_else(|| at.checked_add(FAR_FUTURE))
    .unwrap_or(at)
}

/// A single queue in a single region
#[derive(Debug)]
pub struct InMemoryQueue {
  name: String,
  region: String,
  messages: Mutex<VecDeque<StoredMessage>>,
  available: Condvar,
}

impl InMemoryQueue {
  pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      region: region.into(),
      messages: Mutex::new(VecDeque::new()),
      available: Condvar::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn region(&self) -> &str {
    &self.region
  }

  pub fn push(&self, body: impl Into<String>) -> String {
    let message_id = Uuid::now_v7().to_string();
    self.messages.lock().push_back(StoredMessage {
      message_id: message_id.clone(),
      body: body.into(),
      receive_count: 0,
      invisible_until: None,
      receipt_handle: None,
    });
    self.available.notify_all();
    message_id
  }

  /// Messages not yet committed (visible or in flight)
  pub fn len(&self) -> usize {
    self.messages.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Messages currently hidden by a visibility timeout
  pub fn in_flight(&self) -> usize {
    let now = Instant::now();
    self.messages.lock().iter().filter(|m| !m.is_visible(now)).count()
  }

  /// Bodies of every stored message, in queue order
  pub fn bodies(&self) -> Vec<String> {
    self.messages.lock().iter().map(|m| m.body.clone()).collect()
  }

  pub fn receive(&self, max_count: usize, visibility_timeout: Duration, wait_timeout: Duration) -> Vec<QueueMessage> {
    let deadline = saturating_add(Instant::now(), wait_timeout);
    let mut messages = self.messages.lock();

    loop {
      let now = Instant::now();
      let mut received = Vec::new();

      for stored in messages.iter_mut() {
        if received.len() >= max_count {
          break;
        }
        if !stored.is_visible(now) {
          continue;
        }

        let receipt = Uuid::new_v4().to_string();
        stored.receive_count += 1;
        stored.invisible_until = Some(saturating_add(now, visibility_timeout));
        stored.receipt_handle = Some(receipt.clone());

        received.push(QueueMessage {
          message_id: stored.message_id.clone(),
          receipt_handle: receipt,
          body: stored.body.clone(),
          receive_count: stored.receive_count,
        });
      }

      if !received.is_empty() || now >= deadline {
        return received;
      }

      // Wake on a push, on the deadline, or when the next hidden message reappears
      let next_visible = messages.iter().filter_map(|m| m.invisible_until).filter(|t| *t > now).min();
      let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));
      self.available.wait_until(&mut messages, wake_at);
    }
  }

  pub fn commit(&self, message: &QueueMessage) -> Result<(), QueueError> {
    let mut messages = self.messages.lock();
    let position = messages.iter().position(|stored| {
      stored.message_id == message.message_id && stored.receipt_handle.as_deref() == Some(&message.receipt_handle)
    });

    match position {
      Some(index) => {
        messages.remove(index);
        Ok(())
      }
      None => Err(QueueError::InvalidReceipt(message.message_id.clone())),
    }
  }
}

/// Every queue in every region
#[derive(Debug)]
pub struct InMemoryQueueFabric {
  regions: Vec<String>,
  queues: DashMap<(String, String), Arc<InMemoryQueue>>,
}

impl InMemoryQueueFabric {
  pub fn new(regions: Vec<String>) -> Arc<Self> {
    Arc::new(Self {
      regions,
      queues: DashMap::new(),
    })
  }

  pub fn regions(&self) -> &[String] {
    &self.regions
  }

  /// Get or create the queue `name` in `region`
  pub fn queue(&self, region: &str, name: &str) -> Arc<InMemoryQueue> {
    self
      .queues
      .entry((region.to_string(), name.to_string()))
      .or_insert_with(|| Arc::new(InMemoryQueue::new(name, region)))
      .clone()
  }

  /// Queue factory for consumers and producers running in `region`
  pub fn factory(self: &Arc<Self>, region: impl Into<String>) -> InMemoryQueueFactory {
    InMemoryQueueFactory {
      fabric: self.clone(),
      region: region.into(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct InMemoryQueueFactory {
  fabric: Arc<InMemoryQueueFabric>,
  region: String,
}

impl InMemoryQueueFactory {
  pub fn manager(&self, scope: &QueueScope) -> InMemoryQueueManager {
    let name = scope.queue_name();
    let local = self.fabric.queue(&self.region, &name);
    let topic = self
      .fabric
      .regions()
      .iter()
      .map(|region| self.fabric.queue(region, &name))
      .collect();

    InMemoryQueueManager { local, topic }
  }
}

impl QueueManagerFactory for InMemoryQueueFactory {
  fn queue_manager(&self, scope: &QueueScope) -> Arc<dyn QueueManager> {
    Arc::new(self.manager(scope))
  }
}

/// A queue as seen from one region
#[derive(Debug, Clone)]
pub struct InMemoryQueueManager {
  local: Arc<InMemoryQueue>,
  topic: Vec<Arc<InMemoryQueue>>,
}

impl InMemoryQueueManager {
  pub fn local(&self) -> &Arc<InMemoryQueue> {
    &self.local
  }
}

impl QueueManager for InMemoryQueueManager {
  fn send_message(&self, body: &str, is_async: bool) -> Result<(), QueueError> {
    let message_id = self.local.push(body);
    trace!(queue = %self.local.name(), message_id = %message_id, is_async, "Message sent");
    Ok(())
  }

  fn send_messages(&self, bodies: &[String]) -> Result<(), QueueError> {
    for body in bodies {
      self.local.push(body.as_str());
    }
    trace!(queue = %self.local.name(), count = bodies.len(), "Batch sent");
    Ok(())
  }

  fn send_message_to_topic(&self, body: &str) -> Result<(), QueueError> {
    for queue in &self.topic {
      queue.push(body);
    }
    trace!(queue = %self.local.name(), regions = self.topic.len(), "Message sent to topic");
    Ok(())
  }

  fn get_messages(
    &self,
    max_count: usize,
    visibility_timeout: Duration,
    wait_timeout: Duration,
  ) -> Result<Vec<QueueMessage>, QueueError> {
    Ok(self.local.receive(max_count, visibility_timeout, wait_timeout))
  }

  fn commit_message(&self, message: &QueueMessage) -> Result<(), QueueError> {
    self.local.commit(message)
  }

  fn queue_depth(&self) -> Result<u64, QueueError> {
    Ok(self.local.len() as u64)
  }
}
