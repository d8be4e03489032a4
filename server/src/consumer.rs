use crate::model::Message;
use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use azservicebus::prelude::ServiceBusPeekedMessage;
use azservicebus::{ServiceBusClient, ServiceBusReceiver, ServiceBusReceiverOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Shared wrapper around a Service Bus receiver.
///
/// Clones share the receiver, so workers settling messages concurrently go
/// through the same link.
#[derive(Debug, Clone)]
pub struct Consumer {
    entity: String,
    receiver: Arc<Mutex<Option<ServiceBusReceiver>>>,
}

impl PartialEq for Consumer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.receiver, &other.receiver)
    }
}

impl Consumer {
    pub fn new(entity: impl Into<String>, receiver: ServiceBusReceiver) -> Self {
        Self {
            entity: entity.into(),
            receiver: Arc::new(Mutex::new(Some(receiver))),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    fn disposed(&self) -> ServiceBusError {
        ServiceBusError::Internal(format!("receiver for {} already disposed", self.entity))
    }

    pub async fn peek_messages(
        &self,
        max_count: u32,
        from_sequence_number: Option<i64>,
    ) -> ServiceBusResult<Vec<Message>> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or_else(|| self.disposed())?;
        let messages = receiver
            .peek_messages(max_count, from_sequence_number)
            .await
            .map_err(|e| ServiceBusError::from_transport(format!("peek {}", self.entity), e))?;

        messages.iter().map(peeked_to_message).collect()
    }

    /// Receives up to `max_count` messages. A window that expires with
    /// nothing delivered yields an empty batch rather than an error.
    pub async fn receive_messages_with_timeout(
        &self,
        max_count: u32,
        timeout: Duration,
    ) -> ServiceBusResult<Vec<azservicebus::ServiceBusReceivedMessage>> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or_else(|| self.disposed())?;
        match tokio::time::timeout(timeout, receiver.receive_messages(max_count)).await {
            Ok(result) => result
                .map_err(|e| ServiceBusError::from_transport(format!("receive {}", self.entity), e)),
            Err(_) => {
                log::debug!(
                    "receive_messages on {} timed out after {:?}, returning empty result",
                    self.entity,
                    timeout
                );
                Ok(Vec::new())
            }
        }
    }

    pub async fn complete_message(
        &self,
        message: &azservicebus::ServiceBusReceivedMessage,
    ) -> ServiceBusResult<()> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or_else(|| self.disposed())?;
        receiver
            .complete_message(message)
            .await
            .map_err(|e| ServiceBusError::from_transport(format!("complete on {}", self.entity), e))
    }

    pub async fn abandon_message(
        &self,
        message: &azservicebus::ServiceBusReceivedMessage,
    ) -> ServiceBusResult<()> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or_else(|| self.disposed())?;
        receiver
            .abandon_message(message, None)
            .await
            .map_err(|e| ServiceBusError::from_transport(format!("abandon on {}", self.entity), e))
    }

    /// Releases the link. Returns `false` when it was already released.
    pub async fn dispose(&self) -> ServiceBusResult<bool> {
        let mut guard = self.receiver.lock().await;
        match guard.take() {
            Some(receiver) => {
                receiver.dispose().await.map_err(|e| {
                    ServiceBusError::from_transport(format!("close {}", self.entity), e)
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// Peeked and received messages expose the same accessors but share no trait.
macro_rules! to_message {
    ($msg:expr) => {{
        let msg = $msg;
        let body = msg.body().map_err(|e| ServiceBusError::Transport {
            operation: "read message body".to_string(),
            message: e.to_string(),
        })?;
        Ok(Message::new(
            msg.message_id().map(|id| id.to_string()),
            msg.sequence_number(),
            msg.delivery_count().unwrap_or_default(),
            body.to_vec(),
        ))
    }};
}

fn peeked_to_message(msg: &ServiceBusPeekedMessage) -> ServiceBusResult<Message> {
    to_message!(msg)
}

pub(crate) fn received_to_message(
    msg: &azservicebus::ServiceBusReceivedMessage,
) -> ServiceBusResult<Message> {
    to_message!(msg)
}

pub trait ServiceBusClientExt {
    fn create_consumer_for_queue(
        &mut self,
        entity_path: impl Into<String> + Send,
        options: ServiceBusReceiverOptions,
    ) -> impl Future<Output = ServiceBusResult<Consumer>> + Send;
}

impl<RP> ServiceBusClientExt for ServiceBusClient<RP>
where
    RP: azservicebus::ServiceBusRetryPolicy
        + From<azservicebus::ServiceBusRetryOptions>
        + Send
        + Sync
        + 'static,
{
    async fn create_consumer_for_queue(
        &mut self,
        entity_path: impl Into<String> + Send,
        options: ServiceBusReceiverOptions,
    ) -> ServiceBusResult<Consumer> {
        let entity_path = entity_path.into();
        let receiver = self
            .create_receiver_for_queue(entity_path.clone(), options)
            .await
            .map_err(|e| ServiceBusError::from_transport(format!("open {entity_path}"), e))?;

        Ok(Consumer::new(entity_path, receiver))
    }
}
