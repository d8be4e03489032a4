//! Azure Service Bus implementation of [`QueueGateway`].

use super::statistics::QueueStatisticsClient;
use super::{
    Acknowledge, CloseOutcome, Delivery, DeliveryBuffer, Disposition, MessageStream, QueueGateway,
    QueueHandle,
};
use crate::auth::ConnectionString;
use crate::consumer::{Consumer, ServiceBusClientExt, received_to_message};
use crate::model::{QueueInfo, QueueType};
use crate::producer::{Producer, ServiceBusClientProducerExt};
use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use async_trait::async_trait;
use azservicebus::core::BasicRetryPolicy;
use azservicebus::{
    ServiceBusClient, ServiceBusClientOptions, ServiceBusReceivedMessage,
    ServiceBusReceiverOptions, ServiceBusSenderOptions,
};
use futures::StreamExt;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Transport tuning for [`ServiceBusGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Prefetch window used by high-throughput handles
    pub prefetch_count: u32,
    /// Messages requested per receive call
    pub receive_batch_size: u32,
    /// A receive window that delivers nothing within this time ends the stream
    pub receive_timeout: Duration,
    /// Messages requested per peek call
    pub peek_page_size: u32,
    /// Deadline for connection and link setup
    pub open_timeout: Duration,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            prefetch_count: 250,
            receive_batch_size: 50,
            receive_timeout: Duration::from_secs(5),
            peek_page_size: 100,
            open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct Link {
    consumer: Option<Consumer>,
    producer: Option<Producer>,
}

/// Gateway backed by one AMQP connection to a namespace.
///
/// Links are created lazily per handle: a receiver on first peek or receive,
/// a sender on first send. Existence and permissions are checked at `open`
/// through the entity endpoint, which also serves the count queries.
pub struct ServiceBusGateway {
    client: Arc<Mutex<ServiceBusClient<BasicRetryPolicy>>>,
    statistics: QueueStatisticsClient,
    settings: GatewaySettings,
    links: Mutex<HashMap<u64, Link>>,
    next_handle: AtomicU64,
}

impl ServiceBusGateway {
    pub async fn connect(
        connection_string: &str,
        settings: GatewaySettings,
    ) -> ServiceBusResult<Self> {
        let connection = ConnectionString::parse(connection_string)?;
        log::debug!("Connecting to namespace {}", connection.host);

        let client = tokio::time::timeout(
            settings.open_timeout,
            ServiceBusClient::new_from_connection_string(
                connection.as_str(),
                ServiceBusClientOptions::default(),
            ),
        )
        .await
        .map_err(|_| {
            ServiceBusError::OperationTimeout(format!("connect to {}", connection.host))
        })?
        .map_err(|e| ServiceBusError::from_transport(format!("connect to {}", connection.host), e))?;

        let http_client = reqwest::Client::builder()
            .timeout(settings.open_timeout)
            .build()
            .map_err(|e| ServiceBusError::Internal(format!("http client: {e}")))?;

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            statistics: QueueStatisticsClient::new(http_client, connection),
            settings,
            links: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    fn not_open(handle: &QueueHandle) -> ServiceBusError {
        ServiceBusError::Internal(format!("queue handle {handle} is not open"))
    }

    async fn consumer_for(&self, handle: &QueueHandle) -> ServiceBusResult<Consumer> {
        let mut links = self.links.lock().await;
        let link = links
            .get_mut(&handle.id())
            .ok_or_else(|| Self::not_open(handle))?;
        if let Some(consumer) = &link.consumer {
            return Ok(consumer.clone());
        }

        let prefetch_count = if handle.is_high_throughput() {
            self.settings.prefetch_count
        } else {
            0
        };
        let options = ServiceBusReceiverOptions {
            prefetch_count,
            ..Default::default()
        };
        let entity_path = handle.info().entity_path();
        log::debug!("Creating receiver for {entity_path} (prefetch {prefetch_count})");

        let mut client = self.client.lock().await;
        let consumer = tokio::time::timeout(
            self.settings.open_timeout,
            client.create_consumer_for_queue(entity_path.clone(), options),
        )
        .await
        .map_err(|_| ServiceBusError::OperationTimeout(format!("open receiver {entity_path}")))??;

        link.consumer = Some(consumer.clone());
        Ok(consumer)
    }

    async fn producer_for(&self, handle: &QueueHandle) -> ServiceBusResult<Producer> {
        if handle.is_dead_letter() {
            return Err(ServiceBusError::invalid_configuration(format!(
                "cannot send directly to dead-letter queue {}",
                handle.info()
            )));
        }

        let mut links = self.links.lock().await;
        let link = links
            .get_mut(&handle.id())
            .ok_or_else(|| Self::not_open(handle))?;
        if let Some(producer) = &link.producer {
            return Ok(producer.clone());
        }

        let queue_name = handle.info().name.clone();
        log::debug!("Creating sender for {queue_name}");

        let mut client = self.client.lock().await;
        let producer = tokio::time::timeout(
            self.settings.open_timeout,
            client.create_producer_for_queue(queue_name.clone(), ServiceBusSenderOptions::default()),
        )
        .await
        .map_err(|_| ServiceBusError::OperationTimeout(format!("open sender {queue_name}")))??;

        link.producer = Some(producer.clone());
        Ok(producer)
    }
}

/// Settlement through the receiver that delivered the message.
struct ServiceBusAck {
    consumer: Consumer,
    message: ServiceBusReceivedMessage,
}

#[async_trait]
impl Acknowledge for ServiceBusAck {
    async fn settle(self: Box<Self>, disposition: Disposition) -> ServiceBusResult<()> {
        match disposition {
            Disposition::Complete => self.consumer.complete_message(&self.message).await,
            Disposition::Abandon => self.consumer.abandon_message(&self.message).await,
        }
    }
}

async fn into_delivery(
    consumer: &Consumer,
    message: ServiceBusReceivedMessage,
) -> ServiceBusResult<Delivery> {
    match received_to_message(&message) {
        Ok(converted) => Ok(Delivery::new(
            converted,
            Box::new(ServiceBusAck {
                consumer: consumer.clone(),
                message,
            }),
        )),
        Err(e) => {
            // Release the lock before reporting, the message stays on the queue.
            if let Err(abandon_err) = consumer.abandon_message(&message).await {
                log::warn!("Failed to abandon unreadable message: {abandon_err}");
            }
            Err(e)
        }
    }
}

struct ReceiveState {
    consumer: Consumer,
    buffer: DeliveryBuffer,
    failure: Option<ServiceBusError>,
    batch_size: u32,
    timeout: Duration,
    finished: bool,
}

#[async_trait]
impl QueueGateway for ServiceBusGateway {
    async fn open(
        &self,
        name: &str,
        dead_letter: bool,
        high_throughput: bool,
    ) -> ServiceBusResult<QueueHandle> {
        let info = QueueInfo::new(name, QueueType::from_dead_letter_flag(dead_letter))
            .map_err(|e| ServiceBusError::invalid_configuration(e.to_string()))?;

        // Surfaces NotFound and Unauthorized before any link is attached.
        tokio::time::timeout(
            self.settings.open_timeout,
            self.statistics.get_queue_counts(&info.name),
        )
        .await
        .map_err(|_| ServiceBusError::OperationTimeout(format!("open {info}")))??;

        let handle = QueueHandle::new(
            self.next_handle.fetch_add(1, Ordering::SeqCst),
            info,
            high_throughput,
        );
        self.links.lock().await.insert(handle.id(), Link::default());
        log::info!("Opened {handle}");
        Ok(handle)
    }

    async fn count(&self, handle: &QueueHandle) -> ServiceBusResult<usize> {
        if !self.links.lock().await.contains_key(&handle.id()) {
            return Err(Self::not_open(handle));
        }
        let counts = self.statistics.get_queue_counts(&handle.info().name).await?;
        let count = counts.for_queue_type(handle.queue_type());
        log::debug!("{} holds {count} messages", handle.info());
        Ok(count as usize)
    }

    async fn peek_batch(
        &self,
        handle: &QueueHandle,
        page_size: u32,
    ) -> ServiceBusResult<MessageStream> {
        let consumer = self.consumer_for(handle).await?;
        let page_size = page_size.max(1);

        // Cursor: `None` once exhausted, otherwise the next sequence number to peek from.
        let pages = stream::unfold(Some(None::<i64>), move |cursor| {
            let consumer = consumer.clone();
            async move {
                let from_sequence = cursor?;
                match consumer.peek_messages(page_size, from_sequence).await {
                    Err(e) => Some((vec![Err(e)], None)),
                    Ok(page) if page.is_empty() => {
                        Some((vec![Err(ServiceBusError::QueueEmpty)], None))
                    }
                    Ok(page) => {
                        let next = page.last().map(|m| Some(m.sequence + 1));
                        let items = page.into_iter().map(|m| Ok(Delivery::peeked(m))).collect();
                        Some((items, next))
                    }
                }
            }
        });

        Ok(MessageStream::new(pages.flat_map(stream::iter).boxed()))
    }

    async fn receive_stream(&self, handle: &QueueHandle) -> ServiceBusResult<MessageStream> {
        let buffer = DeliveryBuffer::new();
        let state = ReceiveState {
            consumer: self.consumer_for(handle).await?,
            buffer: buffer.clone(),
            failure: None,
            batch_size: self.settings.receive_batch_size.max(1),
            timeout: self.settings.receive_timeout,
            finished: false,
        };

        let deliveries = stream::unfold(state, |mut state| async move {
            loop {
                if state.finished {
                    return None;
                }
                if let Some(delivery) = state.buffer.pop().await {
                    return Some((Ok(delivery), state));
                }
                if let Some(e) = state.failure.take() {
                    state.finished = true;
                    return Some((Err(e), state));
                }

                match state
                    .consumer
                    .receive_messages_with_timeout(state.batch_size, state.timeout)
                    .await
                {
                    Ok(batch) if batch.is_empty() => {
                        state.finished = true;
                        return Some((Err(ServiceBusError::QueueEmpty), state));
                    }
                    Ok(batch) => {
                        // Every message of the batch is locked now; keep the
                        // readable ones in the buffer so they can be released.
                        for message in batch {
                            match into_delivery(&state.consumer, message).await {
                                Ok(delivery) => state.buffer.push(delivery).await,
                                Err(e) => {
                                    state.failure.get_or_insert(e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }
        });

        Ok(MessageStream::buffered(deliveries.boxed(), buffer))
    }

    async fn receive_one(&self, handle: &QueueHandle) -> ServiceBusResult<Delivery> {
        let consumer = self.consumer_for(handle).await?;
        let mut batch = consumer
            .receive_messages_with_timeout(1, self.settings.receive_timeout)
            .await?;
        match batch.pop() {
            Some(message) => into_delivery(&consumer, message).await,
            None => Err(ServiceBusError::QueueEmpty),
        }
    }

    async fn send(&self, handle: &QueueHandle, payload: &[u8]) -> ServiceBusResult<()> {
        let producer = self.producer_for(handle).await?;
        producer
            .send_message(Producer::create_message(payload.to_vec()))
            .await
    }

    async fn close(&self, handle: &QueueHandle) -> ServiceBusResult<CloseOutcome> {
        let Some(link) = self.links.lock().await.remove(&handle.id()) else {
            return Ok(CloseOutcome::NothingToClose);
        };

        if let Some(consumer) = link.consumer {
            consumer.dispose().await?;
        }
        if let Some(producer) = link.producer {
            producer.dispose().await?;
        }
        log::info!("Closed {handle}");
        Ok(CloseOutcome::Closed)
    }
}
