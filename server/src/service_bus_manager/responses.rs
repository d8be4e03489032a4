use super::errors::ServiceBusError;
use crate::bulk_operations::BulkOperationResult;
use crate::model::QueueInfo;
use std::path::PathBuf;
use std::time::Duration;

/// Result of a [`ServiceBusCommand`](super::ServiceBusCommand).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceBusResponse {
    QueueCount {
        queue: QueueInfo,
        count: usize,
    },

    Pulled {
        result: BulkOperationResult,
        /// Files written
        batches: usize,
        directory: PathBuf,
        elapsed: Duration,
    },

    Deleted {
        result: BulkOperationResult,
    },

    Requeued {
        result: BulkOperationResult,
    },

    Sent {
        count: usize,
    },

    Tidied {
        result: BulkOperationResult,
        matched: usize,
        executed: bool,
    },

    /// The command failed; `QueueEmpty` and friends arrive here too.
    Error {
        error: ServiceBusError,
    },
}

impl ServiceBusResponse {
    pub fn into_result(self) -> Result<Self, ServiceBusError> {
        match self {
            Self::Error { error } => Err(error),
            other => Ok(other),
        }
    }
}
