use server::service_bus_manager::ServiceBusError;
use thiserror::Error;

/// Errors surfaced to the operator.
///
/// Each variant maps to its own process exit code, see
/// [`AppError::exit_code`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded, or the saved-connection store
    /// rejected a change
    #[error("{0}")]
    Config(String),

    /// A queue operation failed
    #[error(transparent)]
    ServiceBus(#[from] ServiceBusError),

    /// Terminal or file output failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Arguments that parse but make no sense together
    #[error("{0}")]
    InvalidArgument(String),

    /// The queue held no messages when the command started
    #[error("{0}")]
    NothingToDo(String),
}

impl AppError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::ServiceBus(_) => 1,
            AppError::Config(_) => 2,
            AppError::InvalidArgument(_) => 3,
            AppError::Io(_) => 4,
            AppError::NothingToDo(_) => 5,
        }
    }
}

impl From<log::SetLoggerError> for AppError {
    fn from(err: log::SetLoggerError) -> Self {
        AppError::Config(format!("failed to initialise logging: {err}"))
    }
}

/// Result type alias for CLI operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_and_non_zero() {
        let errors = [
            AppError::ServiceBus(ServiceBusError::QueueEmpty),
            AppError::Config("bad".to_string()),
            AppError::InvalidArgument("bad".to_string()),
            AppError::Io(std::io::Error::other("bad")),
            AppError::NothingToDo("no messages to delete".to_string()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(AppError::exit_code).collect();
        assert!(codes.iter().all(|code| *code != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_service_bus_error_keeps_its_message() {
        let err = AppError::from(ServiceBusError::NotFound {
            entity: "orders".to_string(),
        });
        assert_eq!(err.to_string(), "could not find service bus queue - 404 (orders)");
    }
}
