//! Run command
//!
//! Wires the service to in-memory collaborators and runs the worker pool until
//! ctrl-c. Seeded entities give the workers something to index.

use std::sync::Arc;

use anyhow::{Context, Result};
use index_relay::{
  AsyncEventQueueType, AsyncEventService, Collaborators, QueueIndexingStrategy, WorkerPool,
  config::Config,
  index::InMemoryIndex,
  model::{ApplicationScope, Edge, Entity, Id, now_millis},
  queue::InMemoryQueueFabric,
  staging::InMemoryStagingStore,
  store::{InMemoryEntityStore, InMemoryGraphStore},
};
use tracing::info;
use uuid::Uuid;

pub async fn cmd_run(config: Config, seed: usize) -> Result<()> {
  let fabric = InMemoryQueueFabric::new(config.queue.regions.clone());
  let entities = Arc::new(InMemoryEntityStore::new());
  let graph = Arc::new(InMemoryGraphStore::new());
  let index = Arc::new(InMemoryIndex::new());

  let service = Arc::new(AsyncEventService::new(
    &config,
    Collaborators {
      queues: Arc::new(fabric.factory(config.queue.primary_region.clone())),
      entities: entities.clone(),
      graph: graph.clone(),
      index: index.clone(),
      staging: Arc::new(InMemoryStagingStore::new()),
    },
  ));

  let scope = ApplicationScope::from_application_id(Uuid::now_v7());
  service
    .queue_initialize_application_index(&scope)
    .context("Failed to queue index initialization")?;

  for i in 0..seed {
    let id = Id::generate("item");
    entities.write(
      &scope,
      Entity::new(id.clone(), Uuid::nil())
        .with_field("name", format!("item-{}", i))
        .with_modified(now_millis()),
    );
    let edge = Edge::new(scope.application.clone(), "items", id.clone(), now_millis());
    graph.write_edge(&scope, edge.clone());
    service
      .queue_new_edge(&scope, &id, &edge, QueueIndexingStrategy::Direct)
      .context("Failed to queue demo entity")?;
  }

  let pool = WorkerPool::start(service.clone());
  info!(
    region = %config.queue.primary_region,
    application = %scope.application_id(),
    seeded = seed,
    "Index workers running, press ctrl-c to stop"
  );

  tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
  info!("Shutting down");
  pool.stop().await;

  for queue_type in AsyncEventQueueType::ALL {
    let depth = service.queue_depth(queue_type).context("Failed to read queue depth")?;
    info!(queue = %queue_type, depth, "Remaining backlog");
  }
  info!(documents = index.document_count(), "Indexed documents");
  println!("{}", serde_json::to_string_pretty(&service.metrics())?);

  Ok(())
}
