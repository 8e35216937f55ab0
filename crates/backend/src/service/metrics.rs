//! Service counters
//!
//! Observability only. Nothing in the service reads these back to make a
//! decision.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::AsyncEventQueueType;

#[derive(Debug, Default)]
pub struct Metrics {
  in_flight: AtomicI64,
  workers_regular: AtomicU64,
  workers_utility: AtomicU64,
  workers_delete: AtomicU64,
  received: AtomicU64,
  acked: AtomicU64,
  deferred: AtomicU64,
  errors: AtomicU64,
  dead_lettered: AtomicU64,
  submitted_batches: AtomicU64,
  last_cycle_ms: AtomicI64,
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
  pub in_flight: i64,
  pub workers_regular: u64,
  pub workers_utility: u64,
  pub workers_delete: u64,
  pub received: u64,
  pub acked: u64,
  pub deferred: u64,
  pub errors: u64,
  pub dead_lettered: u64,
  pub submitted_batches: u64,
  /// Creation-to-aggregation latency of the last processed message
  pub last_cycle_ms: i64,
}

impl Metrics {
  pub(super) fn received(&self, count: usize) {
    self.received.fetch_add(count as u64, Ordering::Relaxed);
    self.in_flight.fetch_add(count as i64, Ordering::Relaxed);
  }

  /// Messages leaving the worker, acknowledged or abandoned to redelivery
  pub(super) fn released(&self, count: usize) {
    self.in_flight.fetch_sub(count as i64, Ordering::Relaxed);
  }

  pub(super) fn acked(&self) {
    self.acked.fetch_add(1, Ordering::Relaxed);
  }

  pub(super) fn deferred(&self) {
    self.deferred.fetch_add(1, Ordering::Relaxed);
  }

  pub(super) fn error(&self) {
    self.errors.fetch_add(1, Ordering::Relaxed);
  }

  pub(super) fn dead_lettered(&self) {
    self.dead_lettered.fetch_add(1, Ordering::Relaxed);
  }

  pub(super) fn submitted(&self) {
    self.submitted_batches.fetch_add(1, Ordering::Relaxed);
  }

  pub(super) fn cycle_latency(&self, millis: i64) {
    self.last_cycle_ms.store(millis, Ordering::Relaxed);
  }

  pub(super) fn worker_started(&self, queue_type: AsyncEventQueueType) {
    self.workers(queue_type).fetch_add(1, Ordering::Relaxed);
  }

  pub(super) fn worker_stopped(&self, queue_type: AsyncEventQueueType) {
    self.workers(queue_type).fetch_sub(1, Ordering::Relaxed);
  }

  fn workers(&self, queue_type: AsyncEventQueueType) -> &AtomicU64 {
    match queue_type {
      AsyncEventQueueType::Regular => &self.workers_regular,
      AsyncEventQueueType::Utility => &self.workers_utility,
      AsyncEventQueueType::Delete => &self.workers_delete,
    }
  }

  pub fn snapshot(&self) -> MetricsSnapshot {
    MetricsSnapshot {
      in_flight: self.in_flight.load(Ordering::Relaxed),
      workers_regular: self.workers_regular.load(Ordering::Relaxed),
      workers_utility: self.workers_utility.load(Ordering::Relaxed),
      workers_delete: self.workers_delete.load(Ordering::Relaxed),
      received: self.received.load(Ordering::Relaxed),
      acked: self.acked.load(Ordering::Relaxed),
      deferred: self.deferred.load(Ordering::Relaxed),
      errors: self.errors.load(Ordering::Relaxed),
      dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
      submitted_batches: self.submitted_batches.load(Ordering::Relaxed),
      last_cycle_ms: self.last_cycle_ms.load(Ordering::Relaxed),
    }
  }
}
