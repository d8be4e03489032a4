//! # sb-shovel
//!
//! Command-line front end for bulk Service Bus queue maintenance.
//!
//! - [`cli`] - Argument parsing
//! - [`app`] - Command execution and output
//! - [`config`] - Application configuration
//! - [`config_store`] - Saved connection strings
//! - [`logger`] - Log setup
//! - [`reporter`] - Progress and result rendering
//! - [`error`] - Errors and exit codes

pub mod app;
pub mod cli;
pub mod config;
pub mod config_store;
pub mod error;
pub mod logger;
pub mod reporter;
