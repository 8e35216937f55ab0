pub mod builder;
pub mod index;
pub mod queue;
pub mod service;
pub mod staging;
pub mod store;

mod domain;
pub use domain::{config, event, index as operations, model};

pub use service::{AsyncEventQueueType, AsyncEventService, Collaborators, QueueIndexingStrategy, WorkerPool};
