//! Queue Gateway: the narrow capability surface the bulk engine consumes.
//!
//! One transport-backed implementation ([`ServiceBusGateway`]) and one
//! in-memory double ([`InMemoryGateway`]) sit behind the same
//! [`QueueGateway`] trait.

pub mod in_memory;
pub mod service_bus;
pub mod statistics;

pub use in_memory::InMemoryGateway;
pub use service_bus::{GatewaySettings, ServiceBusGateway};
pub use statistics::{QueueCounts, QueueStatisticsClient};

use crate::model::{Message, QueueInfo, QueueType};
use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::Mutex;

/// Deliveries a receive stream has locked but not yet yielded.
///
/// Transports receive in batches, so a stream that is abandoned part way
/// through may still hold locked messages here.
#[derive(Clone, Default)]
pub struct DeliveryBuffer {
    pending: Arc<Mutex<VecDeque<Delivery>>>,
}

impl DeliveryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, delivery: Delivery) {
        self.pending.lock().await.push_back(delivery);
    }

    pub async fn pop(&self) -> Option<Delivery> {
        self.pending.lock().await.pop_front()
    }

    /// Abandons every buffered delivery and returns how many there were.
    pub async fn release(&self) -> usize {
        let pending: Vec<Delivery> = self.pending.lock().await.drain(..).collect();
        let released = pending.len();
        for delivery in pending {
            let id = delivery.message().display_id().into_owned();
            if let Err(e) = delivery.abandon().await {
                log::warn!("Failed to release buffered message {id}: {e}");
            }
        }
        released
    }
}

/// Lazy, forward-only sequence of deliveries.
///
/// Normal exhaustion is signalled by a final `Err(ServiceBusError::QueueEmpty)`
/// item; any other error item is fatal. A stream cannot be restarted.
///
/// A consumer that stops before exhaustion calls
/// [`MessageStream::release_pending`] so buffered messages go back to the
/// queue instead of waiting out their lock.
pub struct MessageStream {
    deliveries: BoxStream<'static, ServiceBusResult<Delivery>>,
    buffer: Option<DeliveryBuffer>,
}

impl MessageStream {
    /// A stream without read-ahead, such as a peek.
    pub fn new(deliveries: BoxStream<'static, ServiceBusResult<Delivery>>) -> Self {
        Self {
            deliveries,
            buffer: None,
        }
    }

    /// A stream that reads ahead into `buffer`.
    pub fn buffered(
        deliveries: BoxStream<'static, ServiceBusResult<Delivery>>,
        buffer: DeliveryBuffer,
    ) -> Self {
        Self {
            deliveries,
            buffer: Some(buffer),
        }
    }

    /// Ends the stream and abandons whatever it had read ahead.
    ///
    /// Returns the number of released messages.
    pub async fn release_pending(self) -> usize {
        let Self { deliveries, buffer } = self;
        drop(deliveries);
        match buffer {
            Some(buffer) => buffer.release().await,
            None => 0,
        }
    }
}

impl Stream for MessageStream {
    type Item = ServiceBusResult<Delivery>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.deliveries.poll_next_unpin(cx)
    }
}

impl fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream")
            .field("buffered", &self.buffer.is_some())
            .finish_non_exhaustive()
    }
}

/// One logical connection to a queue or its dead-letter sub-queue.
///
/// Handles are cheap identifiers; the live connection stays inside the
/// gateway that issued the handle until [`QueueGateway::close`] is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    id: u64,
    info: QueueInfo,
    high_throughput: bool,
}

impl QueueHandle {
    pub(crate) fn new(id: u64, info: QueueInfo, high_throughput: bool) -> Self {
        Self {
            id,
            info,
            high_throughput,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn info(&self) -> &QueueInfo {
        &self.info
    }

    pub fn queue_type(&self) -> QueueType {
        self.info.queue_type
    }

    pub fn is_dead_letter(&self) -> bool {
        self.info.queue_type.is_dead_letter()
    }

    pub fn is_high_throughput(&self) -> bool {
        self.high_throughput
    }
}

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.info, self.id)
    }
}

/// How a worker settles a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remove the message permanently
    Complete,
    /// Release the message for redelivery
    Abandon,
}

/// Result of a close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    /// The handle was never opened or is already closed
    NothingToClose,
}

/// Transport-side settlement for one delivery.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn settle(self: Box<Self>, disposition: Disposition) -> ServiceBusResult<()>;
}

/// Settlement for peeked messages: there is no lock to release.
pub struct PeekOnly;

#[async_trait]
impl Acknowledge for PeekOnly {
    async fn settle(self: Box<Self>, _disposition: Disposition) -> ServiceBusResult<()> {
        Ok(())
    }
}

/// A message together with the handle that settles it.
///
/// Settling consumes the delivery, so a message is acknowledged at most once.
pub struct Delivery {
    message: Message,
    ack: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(message: Message, ack: Box<dyn Acknowledge>) -> Self {
        Self { message, ack }
    }

    pub fn peeked(message: Message) -> Self {
        Self::new(message, Box::new(PeekOnly))
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub async fn settle(self, disposition: Disposition) -> ServiceBusResult<()> {
        self.ack.settle(disposition).await
    }

    pub async fn complete(self) -> ServiceBusResult<()> {
        self.settle(Disposition::Complete).await
    }

    pub async fn abandon(self) -> ServiceBusResult<()> {
        self.settle(Disposition::Abandon).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Capability surface over a message queue transport.
///
/// Implementations translate engine-level intent into transport operations
/// and normalise every failure into [`ServiceBusError`].
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Opens a queue or its dead-letter sub-queue.
    ///
    /// `high_throughput` requests a larger prefetch window and is meant for
    /// bulk drains only.
    async fn open(
        &self,
        name: &str,
        dead_letter: bool,
        high_throughput: bool,
    ) -> ServiceBusResult<QueueHandle>;

    /// Active or dead-letter message count, depending on the handle.
    async fn count(&self, handle: &QueueHandle) -> ServiceBusResult<usize>;

    /// Non-destructive paged read. Deliveries carry no lock.
    async fn peek_batch(&self, handle: &QueueHandle, page_size: u32)
    -> ServiceBusResult<MessageStream>;

    /// Destructive receive. Every delivery must be settled by the consumer.
    async fn receive_stream(&self, handle: &QueueHandle) -> ServiceBusResult<MessageStream>;

    /// Receives exactly one message, or `QueueEmpty` when none arrives.
    async fn receive_one(&self, handle: &QueueHandle) -> ServiceBusResult<Delivery>;

    async fn send(&self, handle: &QueueHandle, payload: &[u8]) -> ServiceBusResult<()>;

    /// Closes the connection. Safe to call repeatedly.
    async fn close(&self, handle: &QueueHandle) -> ServiceBusResult<CloseOutcome>;
}

/// Source and optional target handles for one operation.
///
/// The target, when present, is always the opposite sub-queue of the source.
#[derive(Debug, Default)]
pub struct OperationTarget {
    source: Option<QueueHandle>,
    target: Option<QueueHandle>,
}

impl OperationTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_source(&mut self, handle: QueueHandle) {
        self.source = Some(handle);
    }

    /// Registers the target handle.
    ///
    /// Rejects a target that addresses the same sub-queue as the source.
    pub fn set_target(&mut self, handle: QueueHandle) -> ServiceBusResult<()> {
        if let Some(source) = &self.source {
            if source.info() == handle.info() {
                return Err(ServiceBusError::invalid_configuration(format!(
                    "target {} is the same sub-queue as the source",
                    handle.info()
                )));
            }
        }
        self.target = Some(handle);
        Ok(())
    }

    pub fn source(&self) -> Option<&QueueHandle> {
        self.source.as_ref()
    }

    pub fn target(&self) -> Option<&QueueHandle> {
        self.target.as_ref()
    }

    pub fn require_source(&self) -> ServiceBusResult<&QueueHandle> {
        self.source
            .as_ref()
            .ok_or_else(|| ServiceBusError::Internal("source queue is not open".to_string()))
    }

    pub fn require_target(&self) -> ServiceBusResult<&QueueHandle> {
        self.target
            .as_ref()
            .ok_or_else(|| ServiceBusError::Internal("target queue is not open".to_string()))
    }

    /// Closes both handles. Missing handles yield `NothingToClose`, never an
    /// error, so cleanup paths need not track which opens succeeded.
    pub async fn close_all(
        &mut self,
        gateway: &dyn QueueGateway,
    ) -> ServiceBusResult<(CloseOutcome, CloseOutcome)> {
        let source = close_slot(gateway, self.source.take()).await;
        let target = close_slot(gateway, self.target.take()).await;
        Ok((source?, target?))
    }
}

async fn close_slot(
    gateway: &dyn QueueGateway,
    handle: Option<QueueHandle>,
) -> ServiceBusResult<CloseOutcome> {
    match handle {
        Some(handle) => gateway.close(&handle).await,
        None => Ok(CloseOutcome::NothingToClose),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unopened(name: &str) -> QueueHandle {
        QueueHandle::new(
            4242,
            QueueInfo::new(name, QueueType::Main).unwrap(),
            false,
        )
    }

    #[tokio::test]
    async fn test_close_on_never_opened_handle_is_benign() {
        let gateway = InMemoryGateway::new();
        gateway.create_queue("orders").await;
        let handle = unopened("orders");

        assert_eq!(
            gateway.close(&handle).await.unwrap(),
            CloseOutcome::NothingToClose
        );
        assert_eq!(
            gateway.close(&handle).await.unwrap(),
            CloseOutcome::NothingToClose
        );
        assert_eq!(gateway.stats().closed(), 0);
    }

    #[tokio::test]
    async fn test_empty_operation_target_closes_nothing() {
        let gateway = InMemoryGateway::new();
        let mut target = OperationTarget::new();

        let outcome = target.close_all(&gateway).await.unwrap();
        assert_eq!(
            outcome,
            (CloseOutcome::NothingToClose, CloseOutcome::NothingToClose)
        );
        // Second call on the same, now emptied, target.
        let outcome = target.close_all(&gateway).await.unwrap();
        assert_eq!(
            outcome,
            (CloseOutcome::NothingToClose, CloseOutcome::NothingToClose)
        );
    }

    #[tokio::test]
    async fn test_release_pending_abandons_read_ahead() {
        let gateway = InMemoryGateway::new().with_receive_batch(5);
        gateway.seed_text("orders", false, &["a", "b", "c", "d", "e"]).await;
        let handle = gateway.open("orders", false, true).await.unwrap();

        let mut stream = gateway.receive_stream(&handle).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.message().body_text(), "a");
        assert_eq!(gateway.locked_count("orders", false).await, 5);

        assert_eq!(stream.release_pending().await, 4);
        assert_eq!(gateway.locked_count("orders", false).await, 1);

        first.complete().await.unwrap();
        assert_eq!(gateway.locked_count("orders", false).await, 0);
        assert_eq!(
            gateway.bodies("orders", false).await,
            vec!["b", "c", "d", "e"]
        );
    }

    #[tokio::test]
    async fn test_peek_stream_has_nothing_to_release() {
        let gateway = InMemoryGateway::new();
        gateway.seed_text("orders", false, &["a", "b"]).await;
        let handle = gateway.open("orders", false, false).await.unwrap();

        let mut stream = gateway.peek_batch(&handle, 10).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());
        assert_eq!(stream.release_pending().await, 0);
        assert_eq!(gateway.message_count("orders", false).await, 2);
    }
}
