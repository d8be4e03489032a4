use std::fmt::Display;
use thiserror::Error;

/// Stable error taxonomy for queue operations.
///
/// Raw transport errors are normalised into these variants at the gateway
/// boundary, so callers match on kinds instead of transport wording.
///
/// [`QueueEmpty`] describes an expected end state rather than a failure;
/// [`ServiceBusError::is_benign`] identifies it.
///
/// [`QueueEmpty`]: ServiceBusError::QueueEmpty
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceBusError {
    /// Credential or permission problem (HTTP 401 / AMQP unauthorized-access)
    #[error("unauthorised or inaccessible service bus. please confirm details - 401 ({operation})")]
    Unauthorized { operation: String },

    /// The queue or sub-queue does not exist (HTTP 404 / AMQP not-found)
    #[error("could not find service bus queue - 404 ({entity})")]
    NotFound { entity: String },

    /// Network or protocol level failure. Never retried automatically.
    #[error("transport error during {operation}: {message}")]
    Transport { operation: String, message: String },

    /// The source ran out of messages. Reported as normal completion.
    #[error("no messages to pull")]
    QueueEmpty,

    /// The observed count was zero before any stream was started.
    #[error("no messages to process")]
    NoMessagesToProcess,

    /// Rejected configuration, detected before any queue I/O.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Connection setup exceeded its deadline.
    #[error("operation timeout: {0}")]
    OperationTimeout(String),

    /// Local file collaborator failure.
    #[error("io error: {0}")]
    Io(String),

    /// Worker panic or broken internal invariant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceBusError {
    /// Normalises a transport error by inspecting its status signal.
    ///
    /// Azure surfaces both HTTP status codes and AMQP condition names in the
    /// rendered error, so both spellings are recognised.
    pub fn from_transport(operation: impl Into<String>, err: impl Display) -> Self {
        let operation = operation.into();
        let message = err.to_string();
        let lowered = message.to_lowercase();

        if lowered.contains("401")
            || lowered.contains("unauthorized")
            || lowered.contains("unauthorised")
        {
            return Self::Unauthorized { operation };
        }
        if lowered.contains("404")
            || lowered.contains("not-found")
            || lowered.contains("notfound")
            || lowered.contains("not found")
        {
            return Self::NotFound { entity: operation };
        }
        Self::Transport { operation, message }
    }

    /// Maps an HTTP status returned by the management endpoint.
    pub fn from_status(operation: impl Into<String>, status: u16, body: &str) -> Self {
        let operation = operation.into();
        match status {
            401 | 403 => Self::Unauthorized { operation },
            404 => Self::NotFound { entity: operation },
            _ => Self::Transport {
                operation,
                message: format!("HTTP {status}: {body}"),
            },
        }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// `true` for end states that callers should not report as failures.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::QueueEmpty)
    }
}

impl From<std::io::Error> for ServiceBusError {
    fn from(err: std::io::Error) -> Self {
        ServiceBusError::Io(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ServiceBusError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        ServiceBusError::OperationTimeout(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ServiceBusError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceBusError::Internal(format!("worker task failed: {err}"))
    }
}

// Result type alias for convenience
pub type ServiceBusResult<T> = Result<T, ServiceBusError>;
