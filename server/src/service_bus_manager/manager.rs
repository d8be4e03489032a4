use super::command_handlers::*;
use super::commands::ServiceBusCommand;
use super::errors::{ServiceBusError, ServiceBusResult};
use super::responses::ServiceBusResponse;
use crate::bulk_operations::{BatchConfig, BulkOperationEngine, ProgressReport, ProgressSink};
use crate::files::{BatchWriter, FileBatchWriter, OutputSettings};
use crate::gateway::{QueueGateway, ServiceBusGateway};
use std::sync::Arc;

/// Runs [`ServiceBusCommand`]s against one namespace.
///
/// Each command opens the handles it needs, runs to completion and closes
/// them again on every path, so one manager can serve any number of
/// sequential commands.
///
/// Progress of bulk commands is published to the receiver returned by
/// [`subscribe`](Self::subscribe); without a subscriber it is discarded.
///
/// # Examples
///
/// ```no_run
/// use server::bulk_operations::BatchConfig;
/// use server::files::OutputSettings;
/// use server::service_bus_manager::{ServiceBusCommand, ServiceBusManager};
///
/// # async fn example(connection_string: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let mut manager = ServiceBusManager::connect(
///     connection_string,
///     BatchConfig::default(),
///     OutputSettings::default(),
/// )
/// .await?;
/// let progress = manager.subscribe(64);
///
/// let response = manager
///     .execute_command(ServiceBusCommand::GetQueueCount {
///         queue_name: "orders".to_string(),
///         dead_letter: true,
///     })
///     .await;
/// # Ok(())
/// # }
/// ```
pub struct ServiceBusManager {
    queue_handler: QueueCommandHandler,
    pull_handler: PullCommandHandler,
    delete_handler: DeleteCommandHandler,
    requeue_handler: RequeueCommandHandler,
    send_handler: SendCommandHandler,
    tidy_handler: TidyCommandHandler,

    events: ProgressSink,
}

impl ServiceBusManager {
    /// Builds a manager over an existing gateway.
    ///
    /// Pulled batches go to files under `output`; see
    /// [`with_batch_writer`](Self::with_batch_writer) to redirect them.
    pub fn new(
        gateway: Arc<dyn QueueGateway>,
        batch_config: BatchConfig,
        output: OutputSettings,
    ) -> Self {
        let status_interval = batch_config.status_interval();
        let engine = Arc::new(BulkOperationEngine::new(batch_config));
        let directory = output.directory();
        let writer: Arc<dyn BatchWriter> = Arc::new(FileBatchWriter::new(output));

        Self {
            queue_handler: QueueCommandHandler::new(gateway.clone()),
            pull_handler: PullCommandHandler::new(
                gateway.clone(),
                engine.clone(),
                writer,
                directory,
            ),
            delete_handler: DeleteCommandHandler::new(gateway.clone(), engine.clone()),
            requeue_handler: RequeueCommandHandler::new(gateway.clone(), engine.clone()),
            send_handler: SendCommandHandler::new(gateway.clone(), status_interval),
            tidy_handler: TidyCommandHandler::new(gateway, engine),
            events: ProgressSink::disabled(),
        }
    }

    /// Connects to the namespace in `connection_string`.
    ///
    /// Fails with `InvalidConfiguration` on a malformed connection string and
    /// `OperationTimeout` when the connection is not established in time.
    pub async fn connect(
        connection_string: &str,
        batch_config: BatchConfig,
        output: OutputSettings,
    ) -> ServiceBusResult<Self> {
        let gateway =
            ServiceBusGateway::connect(connection_string, batch_config.gateway_settings()).await?;
        Ok(Self::new(Arc::new(gateway), batch_config, output))
    }

    /// Replaces the destination of pulled batches.
    pub fn with_batch_writer(mut self, writer: Arc<dyn BatchWriter>) -> Self {
        self.pull_handler.set_writer(writer);
        self
    }

    /// Starts publishing progress events to a new bounded channel.
    ///
    /// A previous subscription stops receiving events. A subscriber that
    /// stops reading slows bulk commands down once `capacity` is reached.
    pub fn subscribe(&mut self, capacity: usize) -> flume::Receiver<ProgressReport> {
        let (sink, receiver) = ProgressSink::channel(capacity);
        self.events = sink;
        receiver
    }

    /// Executes a command and returns the response.
    ///
    /// Failures come back as [`ServiceBusResponse::Error`].
    pub async fn execute_command(&self, command: ServiceBusCommand) -> ServiceBusResponse {
        log::debug!("Executing command: {}", command.name());

        match self.handle_command(command).await {
            Ok(response) => response,
            Err(error) => {
                if matches!(error, ServiceBusError::NoMessagesToProcess) {
                    log::info!("Command ended without work: {error}");
                } else {
                    log::error!("Command execution failed: {error}");
                }
                ServiceBusResponse::Error { error }
            }
        }
    }

    async fn handle_command(
        &self,
        command: ServiceBusCommand,
    ) -> ServiceBusResult<ServiceBusResponse> {
        let events = &self.events;
        match command {
            ServiceBusCommand::GetQueueCount {
                queue_name,
                dead_letter,
            } => {
                self.queue_handler
                    .handle_get_queue_count(&queue_name, dead_letter)
                    .await
            }
            ServiceBusCommand::PullMessages {
                queue_name,
                dead_letter,
                lines_per_file,
            } => {
                self.pull_handler
                    .handle_pull(&queue_name, dead_letter, lines_per_file, events)
                    .await
            }
            ServiceBusCommand::DeleteMessages {
                queue_name,
                dead_letter,
                all,
                throttle,
            } => {
                self.delete_handler
                    .handle_delete(&queue_name, dead_letter, all, throttle, events)
                    .await
            }
            ServiceBusCommand::RequeueMessages {
                queue_name,
                dead_letter,
                all,
            } => {
                self.requeue_handler
                    .handle_requeue(&queue_name, dead_letter, all, events)
                    .await
            }
            ServiceBusCommand::SendMessages {
                queue_name,
                payloads,
            } => {
                self.send_handler
                    .handle_send(&queue_name, &payloads, events)
                    .await
            }
            ServiceBusCommand::TidyMessages {
                queue_name,
                dead_letter,
                pattern,
                execute,
            } => {
                self.tidy_handler
                    .handle_tidy(&queue_name, dead_letter, &pattern, execute, events)
                    .await
            }
        }
    }
}
