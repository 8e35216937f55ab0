//! Staged batch reads under replication lag.

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use pretty_assertions::assert_eq;
  use uuid::Uuid;

  use crate::{
    domain::{
      event::{AsyncEvent, EventKind},
      index::IndexOperationMessage,
    },
    service::{
      AsyncEventQueueType::Regular,
      __tests__::helpers::{TestContext, test_config, wait_for_redelivery},
    },
    staging::{Replication, StagingStore},
  };

  /// Stage the batch for a fresh entity and return its id
  fn stage_entity_batch(ctx: &TestContext) -> Uuid {
    let user = ctx.entity("user");
    let batch = ctx
      .service
      .builder()
      .build_entity_index(&ctx.scope, &user.id, 0)
      .unwrap()
      .unwrap();
    ctx
      .service
      .queue_index_operation_message(&batch, Regular)
      .unwrap()
      .unwrap()
  }

  fn with_quorum_window(window_ms: u64, replication: Replication) -> TestContext {
    let mut config = test_config();
    config.queue.local_quorum_timeout_ms = window_ms;
    TestContext::with_options(config, replication)
  }

  #[test]
  fn test_miss_inside_quorum_window_is_deferred_quietly() {
    let ctx = with_quorum_window(10_000, Replication::Stalled);
    stage_entity_batch(&ctx);

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 0);
    assert_eq!(outcome.deferred, 1);
    assert_eq!(ctx.queue(Regular).len(), 1);
    assert_eq!(ctx.service.metrics().errors, 0);
    assert_eq!(ctx.service.metrics().deferred, 1);
  }

  #[test]
  fn test_miss_past_quorum_window_reads_with_quorum() {
    let ctx = with_quorum_window(10, Replication::Stalled);
    stage_entity_batch(&ctx);
    std::thread::sleep(Duration::from_millis(30));

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 1);
    assert_eq!(ctx.documents().len(), 1);
  }

  #[test]
  fn test_lost_batch_is_an_error_and_stays_queued() {
    let ctx = with_quorum_window(10, Replication::Immediate);
    let batch_id = stage_entity_batch(&ctx);
    ctx.staging.remove(&batch_id.to_string());
    std::thread::sleep(Duration::from_millis(30));

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 0);
    assert_eq!(ctx.queue(Regular).len(), 1);
    assert_eq!(ctx.service.metrics().errors, 1);
    assert!(ctx.documents().is_empty());
  }

  #[test]
  fn test_lagged_batch_is_indexed_after_redelivery() {
    let ctx = with_quorum_window(10_000, Replication::Lagged(Duration::from_millis(100)));
    stage_entity_batch(&ctx);

    let outcome = ctx.run_cycle(Regular);
    assert_eq!(outcome.acked, 0);

    wait_for_redelivery();
    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 1);
    assert_eq!(ctx.documents().len(), 1);
    assert!(ctx.queue(Regular).is_empty());
  }

  #[test]
  fn test_without_quorum_fallback_message_waits_for_map_timeout() {
    let mut config = test_config();
    config.queue.quorum_fallback = false;
    config.queue.local_quorum_timeout_ms = 10;
    config.queue.map_message_timeout_ms = 10_000;
    let ctx = TestContext::with_options(config, Replication::Stalled);
    stage_entity_batch(&ctx);
    std::thread::sleep(Duration::from_millis(30));

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 0);
    assert_eq!(ctx.queue(Regular).len(), 1);
  }

  #[test]
  fn test_without_quorum_fallback_message_is_dropped_after_map_timeout() {
    let mut config = test_config();
    config.queue.quorum_fallback = false;
    config.queue.map_message_timeout_ms = 10;
    let ctx = TestContext::with_options(config, Replication::Stalled);
    stage_entity_batch(&ctx);
    std::thread::sleep(Duration::from_millis(30));

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 1);
    assert!(ctx.queue(Regular).is_empty());
    assert_eq!(ctx.index.submit_count(), 0);
  }

  #[test]
  fn test_empty_staged_batch_is_acked_without_submit() {
    let ctx = TestContext::new();
    let batch_id = Uuid::now_v7();
    let empty = serde_json::to_string(&IndexOperationMessage::new()).unwrap();
    ctx.staging.put_string(&batch_id.to_string(), &empty, 60).unwrap();
    let event = AsyncEvent::new("us-east-1", EventKind::IndexBatchReference { batch_id });
    ctx.queue(Regular).push(event.to_json().unwrap());

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 1);
    assert_eq!(ctx.index.submit_count(), 0);
  }

  #[test]
  fn test_malformed_staged_batch_stays_queued() {
    let ctx = TestContext::new();
    let batch_id = Uuid::now_v7();
    ctx.staging.put_string(&batch_id.to_string(), "[1, 2", 60).unwrap();
    let event = AsyncEvent::new("us-east-1", EventKind::IndexBatchReference { batch_id });
    ctx.queue(Regular).push(event.to_json().unwrap());

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 0);
    assert_eq!(ctx.service.metrics().errors, 1);
  }
}
