use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use azservicebus::{
    ServiceBusClient, ServiceBusMessage, ServiceBusSender, ServiceBusSenderOptions,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared wrapper around a Service Bus sender.
///
/// # Examples
///
/// ```no_run
/// use server::producer::Producer;
/// use azservicebus::ServiceBusSender;
///
/// async fn example(sender: ServiceBusSender) -> server::service_bus_manager::ServiceBusResult<()> {
///     let producer = Producer::new("orders", sender);
///     producer.send_message(Producer::create_message(b"hello".to_vec())).await?;
///     producer.dispose().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Producer {
    entity: String,
    sender: Arc<Mutex<Option<ServiceBusSender>>>,
}

impl PartialEq for Producer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.sender, &other.sender)
    }
}

impl Producer {
    pub fn new(entity: impl Into<String>, sender: ServiceBusSender) -> Self {
        Self {
            entity: entity.into(),
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    pub async fn send_message(&self, message: ServiceBusMessage) -> ServiceBusResult<()> {
        let mut guard = self.sender.lock().await;
        let sender = guard.as_mut().ok_or_else(|| {
            ServiceBusError::Internal(format!("sender for {} already disposed", self.entity))
        })?;
        sender
            .send_message(message)
            .await
            .map_err(|e| ServiceBusError::from_transport(format!("send to {}", self.entity), e))
    }

    /// Wraps a raw payload. The body is forwarded byte for byte.
    pub fn create_message(body: Vec<u8>) -> ServiceBusMessage {
        ServiceBusMessage::new(body)
    }

    /// Releases the link. Returns `false` when it was already released.
    pub async fn dispose(&self) -> ServiceBusResult<bool> {
        let mut guard = self.sender.lock().await;
        match guard.take() {
            Some(sender) => {
                sender.dispose().await.map_err(|e| {
                    ServiceBusError::from_transport(format!("close {}", self.entity), e)
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

pub trait ServiceBusClientProducerExt {
    fn create_producer_for_queue(
        &mut self,
        queue_name: impl Into<String> + Send,
        options: ServiceBusSenderOptions,
    ) -> impl std::future::Future<Output = ServiceBusResult<Producer>> + Send;
}

impl<RP> ServiceBusClientProducerExt for ServiceBusClient<RP>
where
    RP: azservicebus::ServiceBusRetryPolicy
        + From<azservicebus::ServiceBusRetryOptions>
        + Send
        + Sync
        + 'static,
{
    async fn create_producer_for_queue(
        &mut self,
        queue_name: impl Into<String> + Send,
        options: ServiceBusSenderOptions,
    ) -> ServiceBusResult<Producer> {
        let queue_name = queue_name.into();
        let sender = self
            .create_sender(queue_name.clone(), options)
            .await
            .map_err(|e| ServiceBusError::from_transport(format!("open {queue_name}"), e))?;

        Ok(Producer::new(queue_name, sender))
    }
}
