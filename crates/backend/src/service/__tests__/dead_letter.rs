//! Receive threshold and dead-letter redrive.

#[cfg(test)]
mod tests {
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  use pretty_assertions::assert_eq;
  use uuid::Uuid;

  use crate::{
    domain::model::{Entity, Id},
    queue::{QueueError, QueueMessage},
    service::{
      AsyncEventQueueType::{self, Regular},
      DeadLetterSink, QueueIndexingStrategy,
      __tests__::helpers::{TestContext, test_config, wait_for_redelivery},
    },
    staging::Replication,
  };

  fn with_threshold(max_receive_count: u32) -> crate::config::Config {
    let mut config = test_config();
    config.index.max_receive_count = Some(max_receive_count);
    config
  }

  /// Queue a new-edge event whose target entity does not exist yet
  fn queue_unresolvable(ctx: &TestContext) -> Id {
    let missing = Id::generate("user");
    let edge = ctx.edge_to(&missing, "members");
    ctx
      .service
      .queue_new_edge(&ctx.scope, &missing, &edge, QueueIndexingStrategy::Direct)
      .unwrap();
    missing
  }

  #[test]
  fn test_message_over_threshold_moves_to_dead_queue() {
    let ctx = TestContext::with_config(with_threshold(1));
    queue_unresolvable(&ctx);

    let outcome = ctx.run_cycle(Regular);
    assert_eq!(outcome.acked, 0);

    wait_for_redelivery();
    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 1);
    assert!(ctx.queue(Regular).is_empty());
    assert_eq!(ctx.dead_queue(Regular).len(), 1);
    assert_eq!(ctx.service.metrics().dead_lettered, 1);
  }

  #[test]
  fn test_redriven_message_is_indexed() {
    let ctx = TestContext::with_config(with_threshold(1));
    let missing = queue_unresolvable(&ctx);
    ctx.run_cycle(Regular);
    wait_for_redelivery();
    ctx.run_cycle(Regular);
    assert_eq!(ctx.dead_queue(Regular).len(), 1);

    ctx.entities.write(&ctx.scope, Entity::new(missing, Uuid::nil()));
    let moved = ctx.service.redrive_dead_letters(Regular).unwrap();

    assert_eq!(moved, 1);
    assert!(ctx.dead_queue(Regular).is_empty());
    assert_eq!(ctx.queue(Regular).len(), 1);

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 1);
    assert_eq!(ctx.documents().len(), 1);
  }

  #[test]
  fn test_redrive_of_empty_dead_queue_moves_nothing() {
    let ctx = TestContext::new();
    assert_eq!(ctx.service.redrive_dead_letters(Regular).unwrap(), 0);
  }

  #[derive(Default)]
  struct RejectingSink {
    calls: AtomicUsize,
  }

  impl DeadLetterSink for RejectingSink {
    fn accept(&self, _queue_type: AsyncEventQueueType, _message: &QueueMessage) -> Result<(), QueueError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Err(QueueError::Unavailable("dead letter store offline".into()))
    }
  }

  #[test]
  fn test_rejected_dead_letter_stays_on_live_queue() {
    let sink = Arc::new(RejectingSink::default());
    let ctx = TestContext::build(with_threshold(1), Replication::Immediate, |service| {
      service.with_dead_letter_sink(sink.clone())
    });
    queue_unresolvable(&ctx);
    ctx.run_cycle(Regular);
    wait_for_redelivery();

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 0);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.queue(Regular).len(), 1);
    assert!(ctx.dead_queue(Regular).is_empty());
    assert_eq!(ctx.service.metrics().dead_lettered, 0);
  }

  #[test]
  fn test_without_threshold_messages_are_redelivered_indefinitely() {
    let ctx = TestContext::new();
    queue_unresolvable(&ctx);

    for _ in 0..3 {
      let outcome = ctx.run_cycle(Regular);
      assert_eq!(outcome.acked, 0);
      wait_for_redelivery();
    }

    let messages = ctx.service.take(Regular).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].receive_count, 4);
    assert!(ctx.dead_queue(Regular).is_empty());
  }
}
