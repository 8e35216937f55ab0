//! Receive-cycle tests: dispatch, aggregation, submit and ack.
//!
//! Cycles are driven by hand with `TestContext::run_cycle` so every assertion
//! sees a settled queue.

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use uuid::Uuid;

  use crate::{
    domain::{
      event::{AsyncEvent, EventKind},
      index::{DeIndexOperation, IndexOperationMessage},
      model::{EdgeScope, Entity, Id},
    },
    service::{
      AsyncEventQueueType::{Delete, Regular},
      QueueIndexingStrategy,
      __tests__::helpers::{TestContext, test_config, wait_for_redelivery},
    },
    staging::StagingStore,
    store::{EntityStore, GraphStore},
  };

  #[test]
  fn test_new_edge_is_indexed_and_acked() {
    let ctx = TestContext::new();
    let user = ctx.entity("user");
    let edge = ctx.edge_to(&user.id, "members");

    ctx
      .service
      .queue_new_edge(&ctx.scope, &user.id, &edge, QueueIndexingStrategy::Direct)
      .unwrap();
    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.received, 1);
    assert_eq!(outcome.acked, 1);
    assert_eq!(ctx.documents().len(), 1);
    assert!(ctx.queue(Regular).is_empty());
    assert_eq!(ctx.commit_count(), 1);
  }

  /// A failed submit must not ack anything from its cycle.
  #[test]
  fn test_submit_failure_acks_nothing() {
    let ctx = TestContext::new();
    let user = ctx.entity("user");
    let first = ctx.edge_to(&user.id, "members");
    let second = ctx.edge_to(&user.id, "owners");
    for edge in [&first, &second] {
      ctx
        .service
        .queue_new_edge(&ctx.scope, &user.id, edge, QueueIndexingStrategy::Direct)
        .unwrap();
    }

    ctx.index.set_failing(true);
    let outcome = ctx.run_cycle(Regular);

    assert!(outcome.submit_failed);
    assert_eq!(outcome.acked, 0);
    assert_eq!(ctx.commit_count(), 0);
    assert_eq!(ctx.queue(Regular).len(), 2);

    // both come back and succeed once the index recovers
    ctx.index.set_failing(false);
    wait_for_redelivery();
    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 2);
    assert_eq!(ctx.documents().len(), 2);
    assert!(ctx.queue(Regular).is_empty());
  }

  /// Message A's handler fails, message B's succeeds: only B is acked and A
  /// comes back on a later poll.
  #[test]
  fn test_failed_handler_defers_only_its_own_message() {
    let ctx = TestContext::new();
    let missing = Id::generate("user");
    let user = ctx.entity("user");
    let edge_a = ctx.edge_to(&missing, "members");
    let edge_b = ctx.edge_to(&user.id, "members");

    ctx
      .service
      .queue_new_edge(&ctx.scope, &missing, &edge_a, QueueIndexingStrategy::Direct)
      .unwrap();
    ctx
      .service
      .queue_new_edge(&ctx.scope, &user.id, &edge_b, QueueIndexingStrategy::Direct)
      .unwrap();

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.received, 2);
    assert_eq!(outcome.acked, 1);
    assert_eq!(outcome.deferred, 1);
    assert_eq!(ctx.commit_count(), 1);
    assert_eq!(ctx.documents().len(), 1);

    wait_for_redelivery();
    let redelivered = ctx.service.take(Regular).unwrap();

    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].receive_count, 2);
    match AsyncEvent::from_json(&redelivered[0].body).unwrap().kind {
      EventKind::NewEdge { entity_id, .. } => assert_eq!(entity_id, missing),
      other => panic!("unexpected event {:?}", other),
    }
  }

  /// A staged batch whose document id names no application defers only its
  /// own message; the healthy message polled with it is indexed and acked.
  #[test]
  fn test_bad_staged_batch_does_not_stall_its_cycle() {
    let ctx = TestContext::new();
    let mut bad = IndexOperationMessage::new();
    bad.add_de_index_request(DeIndexOperation {
      index: "x".to_string(),
      document_id: "garbage".to_string(),
    });
    let batch_id = Uuid::now_v7();
    ctx
      .staging
      .put_string(&batch_id.to_string(), &serde_json::to_string(&bad).unwrap(), 60)
      .unwrap();
    let reference = AsyncEvent::new("us-east-1", EventKind::IndexBatchReference { batch_id });
    ctx.queue(Regular).push(reference.to_json().unwrap());

    let user = ctx.entity("user");
    let edge = ctx.edge_to(&user.id, "members");
    ctx
      .service
      .queue_new_edge(&ctx.scope, &user.id, &edge, QueueIndexingStrategy::Direct)
      .unwrap();

    let outcome = ctx.run_cycle(Regular);

    assert!(!outcome.submit_failed);
    assert_eq!(outcome.received, 2);
    assert_eq!(outcome.acked, 1);
    assert_eq!(outcome.deferred, 1);
    assert_eq!(ctx.documents().len(), 1);
    assert_eq!(ctx.service.metrics().errors, 1);

    wait_for_redelivery();
    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.received, 1);
    assert_eq!(outcome.acked, 0);
    assert_eq!(ctx.queue(Regular).len(), 1);
  }

  #[test]
  fn test_concurrent_new_edges_yield_one_document() {
    let ctx = TestContext::new();
    let user = ctx.entity("user");
    let edge = ctx.edge_to(&user.id, "members");

    std::thread::scope(|s| {
      for _ in 0..2 {
        s.spawn(|| {
          ctx
            .service
            .queue_new_edge(&ctx.scope, &user.id, &edge, QueueIndexingStrategy::Async)
            .unwrap();
        });
      }
    });

    let mut acked = 0;
    while acked < 2 {
      let outcome = ctx.run_cycle(Regular);
      assert!(outcome.received > 0, "queue drained before both events were acked");
      acked += outcome.acked;
    }

    assert!(ctx.index.submit_count() >= 1);
    assert_eq!(ctx.documents().len(), 1);
  }

  #[test]
  fn test_stale_entity_update_is_acked_without_submit() {
    let ctx = TestContext::new();
    let user = ctx
      .entities
      .write(&ctx.scope, Entity::new(Id::generate("user"), Uuid::nil()).with_modified(100));

    ctx
      .service
      .queue_entity_index_update(&ctx.scope, &user, 200, QueueIndexingStrategy::Direct)
      .unwrap();
    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 1);
    assert_eq!(ctx.index.submit_count(), 0);
  }

  #[test]
  fn test_entity_index_update_indexes_latest_state() {
    let ctx = TestContext::new();
    let user = ctx.entity("user");
    let latest = ctx.entities.write(&ctx.scope, user.clone().with_field("name", "grace"));

    ctx
      .service
      .queue_entity_index_update(&ctx.scope, &user, 0, QueueIndexingStrategy::Direct)
      .unwrap();
    ctx.run_cycle(Regular);

    let documents = ctx.documents();
    assert_eq!(documents.len(), 1);
    assert!(documents[0].contains(&latest.version.to_string()));
    let document = ctx.index.document(&ctx.location().write_alias, &documents[0]).unwrap();
    assert_eq!(document["name"], "grace");
  }

  #[test]
  fn test_undecodable_message_is_left_for_redelivery() {
    let ctx = TestContext::new();
    ctx.queue(Regular).push("{ not an event");

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.received, 1);
    assert_eq!(outcome.acked, 0);
    assert_eq!(ctx.queue(Regular).len(), 1);
    assert_eq!(ctx.service.metrics().errors, 1);
    assert_eq!(ctx.service.metrics().in_flight, 0);
  }

  #[test]
  fn test_entity_delete_de_indexes_marked_versions() {
    let ctx = TestContext::new();
    let user = ctx.entity("user");
    ctx
      .service
      .queue_entity_index_update(&ctx.scope, &user, 0, QueueIndexingStrategy::Direct)
      .unwrap();
    ctx.run_cycle(Regular);
    assert_eq!(ctx.documents().len(), 1);

    ctx.entities.mark(&ctx.scope, &user.id).unwrap();
    ctx.service.queue_entity_delete(&ctx.scope, &user.id).unwrap();
    let outcome = ctx.run_cycle(Delete);

    assert_eq!(outcome.acked, 1);
    assert!(ctx.documents().is_empty());
    assert_eq!(ctx.entities.version_count(&ctx.scope, &user.id), 0);
  }

  #[test]
  fn test_delete_of_unmarked_entity_submits_nothing() {
    let ctx = TestContext::new();
    let user = ctx.entity("user");

    ctx.service.queue_entity_delete(&ctx.scope, &user.id).unwrap();
    let outcome = ctx.run_cycle(Delete);

    assert_eq!(outcome.acked, 1);
    assert_eq!(ctx.index.submit_count(), 0);
    assert_eq!(ctx.entities.version_count(&ctx.scope, &user.id), 1);
  }

  #[test]
  fn test_delete_batch_runs_collection_deletes() {
    let ctx = TestContext::new();
    let user = ctx.entity("user");
    let collection_edge = ctx.graph.edges_to_target(&ctx.scope, &user.id).unwrap().remove(0);
    ctx
      .service
      .index_batch(
        &[EdgeScope::new(ctx.scope.clone(), collection_edge.clone())],
        0,
        Regular,
      )
      .unwrap();
    ctx.run_cycle(Regular);
    assert_eq!(ctx.documents().len(), 1);

    ctx
      .service
      .delete_batch(&[EdgeScope::new(ctx.scope.clone(), collection_edge)], i64::MAX, Delete)
      .unwrap();
    let outcome = ctx.run_cycle(Delete);

    assert_eq!(outcome.acked, 1);
    assert!(ctx.documents().is_empty());
    assert_eq!(ctx.entities.load(&ctx.scope, &user.id).unwrap(), None);
    assert_eq!(ctx.graph.edge_count(&ctx.scope), 0);
  }

  #[test]
  fn test_delete_edge_removes_edge_and_document() {
    let ctx = TestContext::new();
    let user = ctx.entity("user");
    let edge = ctx.edge_to(&user.id, "members");
    ctx
      .service
      .queue_new_edge(&ctx.scope, &user.id, &edge, QueueIndexingStrategy::Direct)
      .unwrap();
    ctx.run_cycle(Regular);
    assert_eq!(ctx.documents().len(), 1);

    ctx.service.queue_delete_edge(&ctx.scope, &edge).unwrap();
    ctx.run_cycle(Delete);

    assert!(ctx.documents().is_empty());
    assert!(ctx.graph.delete_edge(&ctx.scope, &edge).unwrap().is_none());
  }

  #[test]
  fn test_de_index_old_versions_keeps_current() {
    let ctx = TestContext::new();
    let user = ctx.entity("user");
    ctx
      .service
      .queue_entity_index_update(&ctx.scope, &user, 0, QueueIndexingStrategy::Direct)
      .unwrap();
    ctx.run_cycle(Regular);

    let current = ctx.entities.write(&ctx.scope, user.clone());
    ctx
      .service
      .queue_entity_index_update(&ctx.scope, &user, 0, QueueIndexingStrategy::Direct)
      .unwrap();
    ctx.run_cycle(Regular);
    assert_eq!(ctx.documents().len(), 2);

    ctx
      .service
      .queue_de_index_old_version(&ctx.scope, &user.id, user.version)
      .unwrap();
    ctx.run_cycle(Delete);

    let documents = ctx.documents();
    assert_eq!(documents.len(), 1);
    assert!(documents[0].contains(&current.version.to_string()));
  }

  #[test]
  fn test_initialize_application_index_is_cached() {
    let ctx = TestContext::new();
    ctx.service.queue_initialize_application_index(&ctx.scope).unwrap();
    ctx.run_cycle(Regular);

    assert!(ctx.index.has_index(&ctx.location().write_alias));
    assert_eq!(ctx.index.ensure_count(), 1);

    let user = ctx.entity("user");
    let edge = ctx.edge_to(&user.id, "members");
    ctx
      .service
      .queue_new_edge(&ctx.scope, &user.id, &edge, QueueIndexingStrategy::Direct)
      .unwrap();
    ctx.run_cycle(Regular);

    assert_eq!(ctx.index.ensure_count(), 1);
    assert_eq!(ctx.documents().len(), 1);
  }

  #[test]
  fn test_index_stages_batch_behind_reference() {
    let ctx = TestContext::new();
    let user = ctx.entity("user");

    ctx.service.index(&ctx.scope, &user.id, 0).unwrap();

    assert_eq!(ctx.staging.entry_count(), 1);
    let bodies = ctx.queue(Regular).bodies();
    assert_eq!(bodies.len(), 1);
    let batch_id = match AsyncEvent::from_json(&bodies[0]).unwrap().kind {
      EventKind::IndexBatchReference { batch_id } => batch_id,
      other => panic!("unexpected event {:?}", other),
    };
    assert!(ctx.staging.get_string(&batch_id.to_string()).unwrap().is_some());

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 1);
    assert_eq!(ctx.documents().len(), 1);
  }

  #[test]
  fn test_empty_batch_is_never_queued() {
    let ctx = TestContext::new();

    let batch_id = ctx
      .service
      .queue_index_operation_message(&IndexOperationMessage::new(), Regular)
      .unwrap();

    assert!(batch_id.is_none());
    assert!(ctx.queue(Regular).is_empty());
    assert_eq!(ctx.staging.entry_count(), 0);
  }

  #[test]
  fn test_index_batch_offers_one_event_per_edge() {
    let ctx = TestContext::new();
    let edges: Vec<EdgeScope> = (0..3)
      .map(|_| {
        let user = ctx.entity("user");
        EdgeScope::new(ctx.scope.clone(), ctx.edge_to(&user.id, "members"))
      })
      .collect();

    ctx.service.index_batch(&edges, 0, Regular).unwrap();

    assert_eq!(ctx.service.queue_depth(Regular).unwrap(), 3);
    let outcome = ctx.run_cycle(Regular);
    assert_eq!(outcome.acked, 3);
    // collection edge + members edge per user
    assert_eq!(ctx.documents().len(), 6);
    assert_eq!(ctx.index.submit_count(), 1);
  }

  #[test]
  fn test_replicated_batches_go_through_every_region() {
    let mut config = test_config();
    config.index.replicate_batches = true;
    config.queue.regions = vec!["us-east-1".into(), "eu-west-1".into()];
    let ctx = TestContext::with_config(config);
    let user = ctx.entity("user");
    let edge = ctx.edge_to(&user.id, "members");

    ctx
      .service
      .queue_new_edge(&ctx.scope, &user.id, &edge, QueueIndexingStrategy::Direct)
      .unwrap();
    let outcome = ctx.run_cycle(Regular);

    // staged and fanned out instead of written here
    assert_eq!(outcome.acked, 1);
    assert_eq!(ctx.index.submit_count(), 0);
    assert_eq!(ctx.staging.entry_count(), 1);
    assert_eq!(ctx.fabric.queue("eu-west-1", Regular.queue_name()).len(), 1);

    let outcome = ctx.run_cycle(Regular);

    assert_eq!(outcome.acked, 1);
    assert_eq!(ctx.documents().len(), 1);
  }

  #[test]
  fn test_metrics_track_cycle() {
    let ctx = TestContext::new();
    let user = ctx.entity("user");
    let edge = ctx.edge_to(&user.id, "members");
    ctx
      .service
      .queue_new_edge(&ctx.scope, &user.id, &edge, QueueIndexingStrategy::Direct)
      .unwrap();

    ctx.run_cycle(Regular);
    let metrics = ctx.service.metrics();

    assert_eq!(metrics.received, 1);
    assert_eq!(metrics.acked, 1);
    assert_eq!(metrics.in_flight, 0);
    assert_eq!(metrics.submitted_batches, 1);
  }
}
