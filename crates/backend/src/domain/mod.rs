//! Domain types - core model of the indexing subsystem
//!
//! This module contains the types shared by every layer: configuration, primary
//! store ids and shapes, the event union and index operation batches. They are
//! independent of any particular queue, staging or index backend.

pub mod config;
pub mod event;
pub mod index;
pub mod model;
