//! Bulk operations: the engine that drives a queue through a run and the
//! per-message policies it applies.
//!
//! - `types`: configuration, progress events and run parameters
//! - `engine`: the stream pump and worker pool driver
//! - `policy`: the per-message action trait
//! - `deleter`, `requeuer`, `collector`, `tidier`: delete, requeue, pull and
//!   tidy policies

pub mod collector;
pub mod deleter;
pub mod engine;
pub mod policy;
pub mod requeuer;
pub mod tidier;
pub mod types;

pub use collector::PullPolicy;
pub use deleter::DeletePolicy;
pub use engine::BulkOperationEngine;
pub use policy::MessagePolicy;
pub use requeuer::{RequeuePolicy, validate_requeue};
pub use tidier::TidyPolicy;
pub use types::{
    BatchConfig, BulkOperationResult, ProgressReport, ProgressSink, RunOptions, StreamMode,
};
