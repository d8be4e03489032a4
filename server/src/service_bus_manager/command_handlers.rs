use super::errors::{ServiceBusError, ServiceBusResult};
use super::responses::ServiceBusResponse;
use crate::bulk_operations::{
    BulkOperationEngine, BulkOperationResult, DeletePolicy, ProgressReport, ProgressSink,
    PullPolicy, RequeuePolicy, RunOptions, TidyPolicy, validate_requeue,
};
use crate::files::BatchWriter;
use crate::gateway::{OperationTarget, QueueGateway, QueueHandle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Closes whatever the operation managed to open. Close failures are
/// logged and never replace the operation's own outcome.
async fn close_quietly(target: &mut OperationTarget, gateway: &dyn QueueGateway) {
    match target.close_all(gateway).await {
        Ok((source, target)) => {
            log::debug!("Released handles: source {source:?}, target {target:?}");
        }
        Err(e) => log::warn!("Failed to close queue handles: {e}"),
    }
}

/// Count observed at operation start. Zero ends the operation before any
/// stream is started.
async fn expected_count(gateway: &dyn QueueGateway, handle: &QueueHandle) -> ServiceBusResult<usize> {
    let count = gateway.count(handle).await?;
    if count == 0 {
        log::info!("{} is empty, nothing to process", handle.info());
        return Err(ServiceBusError::NoMessagesToProcess);
    }
    Ok(count)
}

/// Sends payloads one by one, stopping at the first failure.
///
/// Returns the number of messages sent.
pub async fn send_many(
    gateway: &dyn QueueGateway,
    handle: &QueueHandle,
    payloads: &[Vec<u8>],
    status_interval: usize,
    events: &ProgressSink,
) -> ServiceBusResult<usize> {
    if payloads.is_empty() {
        return Err(ServiceBusError::NoMessagesToProcess);
    }

    let total = payloads.len();
    events.send(ProgressReport::Started { total }).await;

    for (sent, payload) in payloads.iter().enumerate() {
        if let Err(e) = gateway.send(handle, payload).await {
            log::error!("Send to {} stopped after {sent} messages: {e}", handle.info());
            events.send(ProgressReport::Fatal(e.clone())).await;
            return Err(e);
        }
        let sent = sent + 1;
        if sent % status_interval.max(1) == 0 {
            events.status(sent, total).await;
        }
    }

    events.send(ProgressReport::Success { processed: total }).await;
    Ok(total)
}

pub struct QueueCommandHandler {
    gateway: Arc<dyn QueueGateway>,
}

impl QueueCommandHandler {
    pub fn new(gateway: Arc<dyn QueueGateway>) -> Self {
        Self { gateway }
    }

    pub async fn handle_get_queue_count(
        &self,
        queue_name: &str,
        dead_letter: bool,
    ) -> ServiceBusResult<ServiceBusResponse> {
        let mut target = OperationTarget::new();
        let outcome = async {
            target.set_source(self.gateway.open(queue_name, dead_letter, false).await?);
            let source = target.require_source()?;
            let count = self.gateway.count(source).await?;
            Ok(ServiceBusResponse::QueueCount {
                queue: source.info().clone(),
                count,
            })
        }
        .await;
        close_quietly(&mut target, self.gateway.as_ref()).await;
        outcome
    }
}

pub struct PullCommandHandler {
    gateway: Arc<dyn QueueGateway>,
    engine: Arc<BulkOperationEngine>,
    writer: Arc<dyn BatchWriter>,
    directory: PathBuf,
}

impl PullCommandHandler {
    pub fn new(
        gateway: Arc<dyn QueueGateway>,
        engine: Arc<BulkOperationEngine>,
        writer: Arc<dyn BatchWriter>,
        directory: PathBuf,
    ) -> Self {
        Self {
            gateway,
            engine,
            writer,
            directory,
        }
    }

    pub fn set_writer(&mut self, writer: Arc<dyn BatchWriter>) {
        self.writer = writer;
    }

    pub async fn handle_pull(
        &self,
        queue_name: &str,
        dead_letter: bool,
        lines_per_file: usize,
        events: &ProgressSink,
    ) -> ServiceBusResult<ServiceBusResponse> {
        let started = Instant::now();
        let policy = Arc::new(PullPolicy::new(self.writer.clone(), lines_per_file)?);

        let mut target = OperationTarget::new();
        let outcome = async {
            // Peeking needs no prefetch window.
            target.set_source(self.gateway.open(queue_name, dead_letter, false).await?);
            let source = target.require_source()?;
            let count = expected_count(self.gateway.as_ref(), source).await?;

            self.writer.prepare().await?;
            let options = RunOptions::peek(count, self.engine.config().peek_page_size());
            let result = self
                .engine
                .run(self.gateway.as_ref(), source, options, policy.clone(), events)
                .await?;

            Ok(ServiceBusResponse::Pulled {
                result,
                batches: policy.batches_written().await,
                directory: self.directory.clone(),
                elapsed: started.elapsed(),
            })
        }
        .await;
        close_quietly(&mut target, self.gateway.as_ref()).await;
        outcome
    }
}

pub struct DeleteCommandHandler {
    gateway: Arc<dyn QueueGateway>,
    engine: Arc<BulkOperationEngine>,
}

impl DeleteCommandHandler {
    pub fn new(gateway: Arc<dyn QueueGateway>, engine: Arc<BulkOperationEngine>) -> Self {
        Self { gateway, engine }
    }

    pub async fn handle_delete(
        &self,
        queue_name: &str,
        dead_letter: bool,
        all: bool,
        throttle: bool,
        events: &ProgressSink,
    ) -> ServiceBusResult<ServiceBusResponse> {
        let mut target = OperationTarget::new();
        let outcome = async {
            target.set_source(self.gateway.open(queue_name, dead_letter, all).await?);
            let source = target.require_source()?;

            if !all {
                return self.delete_one(source).await;
            }

            let count = expected_count(self.gateway.as_ref(), source).await?;
            let options =
                RunOptions::receive(count, self.engine.config().concurrency()).throttled(throttle);
            let result = self
                .engine
                .run(
                    self.gateway.as_ref(),
                    source,
                    options,
                    Arc::new(DeletePolicy),
                    events,
                )
                .await?;
            Ok(ServiceBusResponse::Deleted { result })
        }
        .await;
        close_quietly(&mut target, self.gateway.as_ref()).await;
        outcome
    }

    async fn delete_one(&self, source: &QueueHandle) -> ServiceBusResult<ServiceBusResponse> {
        let processed = match self.gateway.receive_one(source).await {
            Ok(delivery) => {
                log::debug!("Deleting message {}", delivery.message().display_id());
                delivery.complete().await?;
                1
            }
            Err(ServiceBusError::QueueEmpty) => 0,
            Err(e) => return Err(e),
        };
        Ok(ServiceBusResponse::Deleted {
            result: BulkOperationResult::new(1, processed),
        })
    }
}

pub struct RequeueCommandHandler {
    gateway: Arc<dyn QueueGateway>,
    engine: Arc<BulkOperationEngine>,
}

impl RequeueCommandHandler {
    pub fn new(gateway: Arc<dyn QueueGateway>, engine: Arc<BulkOperationEngine>) -> Self {
        Self { gateway, engine }
    }

    pub async fn handle_requeue(
        &self,
        queue_name: &str,
        dead_letter: bool,
        all: bool,
        events: &ProgressSink,
    ) -> ServiceBusResult<ServiceBusResponse> {
        if !dead_letter {
            return Err(ServiceBusError::invalid_configuration(
                "requeue moves messages from the dead-letter queue, the dead-letter flag is required",
            ));
        }

        let mut target = OperationTarget::new();
        let outcome = async {
            target.set_source(self.gateway.open(queue_name, true, all).await?);
            target.set_target(self.gateway.open(queue_name, false, false).await?)?;
            let source = target.require_source()?;
            let destination = target.require_target()?;
            validate_requeue(source, destination)?;

            if !all {
                return self.requeue_one(source, destination).await;
            }

            let count = expected_count(self.gateway.as_ref(), source).await?;
            let policy = Arc::new(RequeuePolicy::new(
                self.gateway.clone(),
                source,
                destination.clone(),
            )?);
            let options = RunOptions::receive(count, self.engine.config().concurrency());
            let result = self
                .engine
                .run(self.gateway.as_ref(), source, options, policy, events)
                .await?;
            Ok(ServiceBusResponse::Requeued { result })
        }
        .await;
        close_quietly(&mut target, self.gateway.as_ref()).await;
        outcome
    }

    async fn requeue_one(
        &self,
        source: &QueueHandle,
        destination: &QueueHandle,
    ) -> ServiceBusResult<ServiceBusResponse> {
        let delivery = match self.gateway.receive_one(source).await {
            Ok(delivery) => delivery,
            Err(ServiceBusError::QueueEmpty) => {
                return Ok(ServiceBusResponse::Requeued {
                    result: BulkOperationResult::new(1, 0),
                });
            }
            Err(e) => return Err(e),
        };

        let sent = self
            .gateway
            .send(destination, &delivery.message().body)
            .await;
        match sent {
            Ok(()) => {
                delivery.complete().await?;
                Ok(ServiceBusResponse::Requeued {
                    result: BulkOperationResult::new(1, 1),
                })
            }
            Err(e) => {
                if let Err(abandon_err) = delivery.abandon().await {
                    log::warn!("Failed to abandon message after send failure: {abandon_err}");
                }
                Err(e)
            }
        }
    }
}

pub struct SendCommandHandler {
    gateway: Arc<dyn QueueGateway>,
    status_interval: usize,
}

impl SendCommandHandler {
    pub fn new(gateway: Arc<dyn QueueGateway>, status_interval: usize) -> Self {
        Self {
            gateway,
            status_interval,
        }
    }

    pub async fn handle_send(
        &self,
        queue_name: &str,
        payloads: &[Vec<u8>],
        events: &ProgressSink,
    ) -> ServiceBusResult<ServiceBusResponse> {
        if payloads.is_empty() {
            return Err(ServiceBusError::NoMessagesToProcess);
        }

        let mut target = OperationTarget::new();
        let outcome = async {
            target.set_target(self.gateway.open(queue_name, false, false).await?)?;
            let destination = target.require_target()?;
            let count = send_many(
                self.gateway.as_ref(),
                destination,
                payloads,
                self.status_interval,
                events,
            )
            .await?;
            Ok(ServiceBusResponse::Sent { count })
        }
        .await;
        close_quietly(&mut target, self.gateway.as_ref()).await;
        outcome
    }
}

pub struct TidyCommandHandler {
    gateway: Arc<dyn QueueGateway>,
    engine: Arc<BulkOperationEngine>,
}

impl TidyCommandHandler {
    pub fn new(gateway: Arc<dyn QueueGateway>, engine: Arc<BulkOperationEngine>) -> Self {
        Self { gateway, engine }
    }

    pub async fn handle_tidy(
        &self,
        queue_name: &str,
        dead_letter: bool,
        pattern: &str,
        execute: bool,
        events: &ProgressSink,
    ) -> ServiceBusResult<ServiceBusResponse> {
        let policy = Arc::new(TidyPolicy::new(pattern, execute)?);

        let mut target = OperationTarget::new();
        let outcome = async {
            target.set_source(self.gateway.open(queue_name, dead_letter, true).await?);
            let source = target.require_source()?;
            let count = expected_count(self.gateway.as_ref(), source).await?;

            let options = RunOptions::receive(count, self.engine.config().concurrency());
            let result = self
                .engine
                .run(self.gateway.as_ref(), source, options, policy.clone(), events)
                .await?;
            Ok(ServiceBusResponse::Tidied {
                result,
                matched: policy.matched(),
                executed: execute,
            })
        }
        .await;
        close_quietly(&mut target, self.gateway.as_ref()).await;
        outcome
    }
}
