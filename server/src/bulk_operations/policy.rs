use super::types::ProgressSink;
use crate::gateway::Disposition;
use crate::model::Message;
use crate::service_bus_manager::errors::ServiceBusResult;
use async_trait::async_trait;

/// Per-message action plugged into the bulk engine.
///
/// `apply` decides how the delivery is settled; the engine performs the
/// settlement. An error abandons the message and ends the run.
#[async_trait]
pub trait MessagePolicy: Send + Sync + 'static {
    /// Short operation name used in log lines.
    fn name(&self) -> &'static str;

    async fn apply(&self, message: &Message, events: &ProgressSink)
    -> ServiceBusResult<Disposition>;

    /// Called once after every worker has finished, on successful runs only.
    async fn finish(&self, _events: &ProgressSink) -> ServiceBusResult<()> {
        Ok(())
    }
}
