//! Worker pool
//!
//! Each worker is a tokio task running a poll loop for one queue. A poll is a
//! blocking long-poll, so it runs on the blocking pool; each received batch is
//! then processed on the blocking pool too, so a slow index write never stalls
//! polling. A worker has at most `event-concurrency-factor` cycles in flight and
//! waits for a free slot before polling again.
//!
//! Stopping cancels the poll loops and waits for them to exit. Cycles already
//! running finish on their own; messages they do not ack are redelivered.

use std::sync::Arc;

use tokio::{sync::Semaphore, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{AsyncEventQueueType, AsyncEventService};

pub struct WorkerPool {
  cancel: CancellationToken,
  workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
  /// Spawn the configured number of workers for every queue. Must be called
  /// from within a tokio runtime.
  pub fn start(service: Arc<AsyncEventService>) -> Self {
    let cancel = CancellationToken::new();
    let mut workers = Vec::new();

    for queue_type in AsyncEventQueueType::ALL {
      for worker_id in 0..service.worker_count(queue_type) {
        let service = service.clone();
        let cancel = cancel.child_token();
        workers.push(tokio::spawn(async move {
          poll_loop(service, queue_type, worker_id, cancel).await;
        }));
      }
    }

    info!(workers = workers.len(), "Started index workers");
    Self { cancel, workers }
  }

  pub fn worker_count(&self) -> usize {
    self.workers.len()
  }

  /// Cancel every worker and wait for the poll loops to exit
  pub async fn stop(self) {
    self.cancel.cancel();
    for result in futures::future::join_all(self.workers).await {
      if let Err(e) = result {
        warn!(error = %e, "Index worker ended abnormally");
      }
    }
    info!("Stopped index workers");
  }
}

async fn poll_loop(
  service: Arc<AsyncEventService>,
  queue_type: AsyncEventQueueType,
  worker_id: usize,
  cancel: CancellationToken,
) {
  let slots = Arc::new(Semaphore::new(service.config().event_concurrency_factor.max(1)));
  let backoff = service.config().failure_retry_backoff();

  service.metrics.worker_started(queue_type);
  debug!(queue = %queue_type, worker_id, "Index worker started");

  loop {
    let permit = tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      permit = slots.clone().acquire_owned() => match permit {
        Ok(permit) => permit,
        Err(_) => break,
      },
    };

    let poll_service = service.clone();
    let poll = tokio::task::spawn_blocking(move || poll_service.take(queue_type));

    let polled = tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      polled = poll => polled,
    };

    match polled {
      Ok(Ok(messages)) if messages.is_empty() => {
        trace!(queue = %queue_type, worker_id, "Empty poll");
      }
      Ok(Ok(messages)) => {
        let cycle_service = service.clone();
        tokio::task::spawn_blocking(move || {
          cycle_service.process_cycle(queue_type, messages);
          drop(permit);
        });
      }
      Ok(Err(e)) => {
        error!(queue = %queue_type, worker_id, error = %e, backoff_ms = backoff.as_millis() as u64, "Failed to dequeue, backing off");
        drop(permit);
        tokio::select! {
          biased;
          _ = cancel.cancelled() => break,
          _ = tokio::time::sleep(backoff) => {}
        }
      }
      Err(e) => {
        error!(queue = %queue_type, worker_id, error = %e, "Poll task failed, backing off");
        drop(permit);
        tokio::select! {
          biased;
          _ = cancel.cancelled() => break,
          _ = tokio::time::sleep(backoff) => {}
        }
      }
    }
  }

  service.metrics.worker_stopped(queue_type);
  debug!(queue = %queue_type, worker_id, "Index worker stopped");
}
