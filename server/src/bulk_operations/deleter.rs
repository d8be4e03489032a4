use super::policy::MessagePolicy;
use super::types::ProgressSink;
use crate::gateway::Disposition;
use crate::model::Message;
use crate::service_bus_manager::errors::ServiceBusResult;
use async_trait::async_trait;

/// Completes every message it sees.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeletePolicy;

#[async_trait]
impl MessagePolicy for DeletePolicy {
    fn name(&self) -> &'static str {
        "delete"
    }

    async fn apply(
        &self,
        message: &Message,
        _events: &ProgressSink,
    ) -> ServiceBusResult<Disposition> {
        log::trace!("Deleting message {}", message.display_id());
        Ok(Disposition::Complete)
    }
}
