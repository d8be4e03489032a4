//! # Shovel Server Library
//!
//! Bulk maintenance of Azure Service Bus queues: pull, delete, requeue, send
//! and tidy messages on a queue or its dead-letter sub-queue.
//!
//! ## Modules
//!
//! - [`auth`] - Connection string parsing and SAS tokens
//! - [`bulk_operations`] - The bulk engine and its per-message policies
//! - [`consumer`] - Message reception from Service Bus queues
//! - [`producer`] - Message production to Service Bus queues
//! - [`files`] - Batch files for pull, message files for send
//! - [`gateway`] - Transport boundary with live and in-memory implementations
//! - [`model`] - Messages and queue identities
//! - [`service_bus_manager`] - Command entry point
//! - [`taskpool`] - Bounded worker pool with cancellation

pub mod auth;
pub mod bulk_operations;
pub mod consumer;
pub mod files;
pub mod gateway;
pub mod model;
pub mod producer;
pub mod service_bus_manager;
pub mod taskpool;
