use super::policy::MessagePolicy;
use super::types::ProgressSink;
use crate::gateway::{Disposition, QueueGateway, QueueHandle};
use crate::model::Message;
use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use async_trait::async_trait;
use std::sync::Arc;

/// Forwards each payload to the target queue, then completes the original.
///
/// A failed send leaves the original on the source (the engine abandons it)
/// and ends the run.
pub struct RequeuePolicy {
    gateway: Arc<dyn QueueGateway>,
    target: QueueHandle,
}

impl RequeuePolicy {
    /// Only dead-letter to active requeues are accepted.
    pub fn new(
        gateway: Arc<dyn QueueGateway>,
        source: &QueueHandle,
        target: QueueHandle,
    ) -> ServiceBusResult<Self> {
        validate_requeue(source, &target)?;
        Ok(Self { gateway, target })
    }
}

/// Checks that `target` is the active queue belonging to dead-letter `source`.
pub fn validate_requeue(source: &QueueHandle, target: &QueueHandle) -> ServiceBusResult<()> {
    if !source.is_dead_letter() {
        return Err(ServiceBusError::invalid_configuration(format!(
            "requeue source {} must be a dead-letter queue",
            source.info()
        )));
    }
    if target.is_dead_letter() || target.info().name != source.info().name {
        return Err(ServiceBusError::invalid_configuration(format!(
            "requeue target {} must be the active queue of {}",
            target.info(),
            source.info()
        )));
    }
    Ok(())
}

#[async_trait]
impl MessagePolicy for RequeuePolicy {
    fn name(&self) -> &'static str {
        "requeue"
    }

    async fn apply(
        &self,
        message: &Message,
        _events: &ProgressSink,
    ) -> ServiceBusResult<Disposition> {
        self.gateway.send(&self.target, &message.body).await?;
        log::trace!(
            "Requeued message {} to {}",
            message.display_id(),
            self.target.info()
        );
        Ok(Disposition::Complete)
    }
}
