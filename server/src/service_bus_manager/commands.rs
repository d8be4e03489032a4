/// Operations the manager can run, one variant per command.
///
/// Every variant carries its full parameters; the manager keeps no state
/// between commands apart from its configuration.
///
/// # Examples
///
/// ```no_run
/// use server::service_bus_manager::ServiceBusCommand;
///
/// let command = ServiceBusCommand::DeleteMessages {
///     queue_name: "orders".to_string(),
///     dead_letter: true,
///     all: true,
///     throttle: false,
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceBusCommand {
    /// Count the messages on a queue or its dead-letter queue.
    GetQueueCount {
        queue_name: String,
        dead_letter: bool,
    },

    /// Peek every message and write the payloads to batch files.
    PullMessages {
        queue_name: String,
        dead_letter: bool,
        /// Messages per output file
        lines_per_file: usize,
    },

    /// Delete one message, or every message observed at start.
    DeleteMessages {
        queue_name: String,
        dead_letter: bool,
        all: bool,
        /// Pause after every status boundary
        throttle: bool,
    },

    /// Move messages from a dead-letter queue back to its active queue.
    RequeueMessages {
        queue_name: String,
        /// Must be `true`; requeue always reads from the dead-letter queue
        dead_letter: bool,
        all: bool,
    },

    /// Send each payload as one message to the active queue.
    SendMessages {
        queue_name: String,
        payloads: Vec<Vec<u8>>,
    },

    /// Delete messages whose payload matches `pattern`.
    TidyMessages {
        queue_name: String,
        dead_letter: bool,
        pattern: String,
        /// Without it matches are only reported
        execute: bool,
    },
}

impl ServiceBusCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetQueueCount { .. } => "count",
            Self::PullMessages { .. } => "pull",
            Self::DeleteMessages { .. } => "delete",
            Self::RequeueMessages { .. } => "requeue",
            Self::SendMessages { .. } => "send",
            Self::TidyMessages { .. } => "tidy",
        }
    }
}
