//! # Service Bus Manager Module
//!
//! Command-driven front of the library. A [`ServiceBusManager`] turns each
//! [`ServiceBusCommand`] into queue handles, an engine run and a
//! [`ServiceBusResponse`].
//!
//! ## Core Components
//!
//! - [`ServiceBusManager`] - Entry point for all commands
//! - [`ServiceBusCommand`] / [`ServiceBusResponse`] - Command/response pattern for operations
//! - [`ServiceBusError`] - Normalised error taxonomy
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use server::bulk_operations::BatchConfig;
//! use server::files::OutputSettings;
//! use server::gateway::InMemoryGateway;
//! use server::service_bus_manager::{ServiceBusCommand, ServiceBusManager, ServiceBusResponse};
//!
//! async fn example() {
//!     let gateway = InMemoryGateway::new();
//!     gateway.seed_text("orders", true, &["a", "b"]).await;
//!
//!     let manager = ServiceBusManager::new(
//!         Arc::new(gateway),
//!         BatchConfig::default(),
//!         OutputSettings::default(),
//!     );
//!     let response = manager
//!         .execute_command(ServiceBusCommand::RequeueMessages {
//!             queue_name: "orders".to_string(),
//!             dead_letter: true,
//!             all: true,
//!         })
//!         .await;
//!     assert!(matches!(response, ServiceBusResponse::Requeued { .. }));
//! }
//! ```

pub use self::commands::ServiceBusCommand;
pub use self::errors::{ServiceBusError, ServiceBusResult};
pub use self::manager::ServiceBusManager;
pub use self::responses::ServiceBusResponse;

/// Per-command orchestration
pub mod command_handlers;
/// Command definitions
pub mod commands;
/// Error types and normalisation
pub mod errors;
/// Main Service Bus Manager implementation
pub mod manager;
/// Response types
pub mod responses;
