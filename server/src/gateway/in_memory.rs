//! In-memory [`QueueGateway`] used by tests and dry runs.
//!
//! Mirrors the broker behaviour the engine depends on: received messages stay
//! locked until settled, abandoned messages return to the back of their
//! sub-queue with an incremented delivery count, and a message abandoned
//! `max_delivery_count` times moves to the dead-letter sub-queue.

use super::{
    Acknowledge, CloseOutcome, Delivery, DeliveryBuffer, Disposition, MessageStream, QueueGateway,
    QueueHandle,
};
use crate::model::{Message, QueueInfo, QueueType};
use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Broker default for the number of deliveries before dead-lettering.
pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

#[derive(Default)]
struct SubQueue {
    available: VecDeque<Message>,
    locked: HashMap<u64, Message>,
}

impl SubQueue {
    fn len(&self) -> usize {
        self.available.len() + self.locked.len()
    }
}

#[derive(Default)]
struct QueueStore {
    active: SubQueue,
    dead_letter: SubQueue,
}

impl QueueStore {
    fn sub_queue(&mut self, queue_type: QueueType) -> &mut SubQueue {
        match queue_type {
            QueueType::Main => &mut self.active,
            QueueType::DeadLetter => &mut self.dead_letter,
        }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueStore>,
    open_handles: HashMap<u64, QueueInfo>,
    next_sequence: i64,
    next_lock: u64,
    denied: bool,
    fail_send_after: Option<usize>,
    fail_receive: Option<ServiceBusError>,
}

impl BrokerState {
    fn ensure_open(&self, handle: &QueueHandle) -> ServiceBusResult<()> {
        if self.open_handles.contains_key(&handle.id()) {
            Ok(())
        } else {
            Err(ServiceBusError::Internal(format!(
                "queue handle {handle} is not open"
            )))
        }
    }

    fn store(&mut self, info: &QueueInfo) -> ServiceBusResult<&mut QueueStore> {
        self.queues
            .get_mut(&info.name)
            .ok_or_else(|| ServiceBusError::NotFound {
                entity: info.entity_path(),
            })
    }

    fn enqueue(&mut self, info: &QueueInfo, body: Vec<u8>) -> ServiceBusResult<()> {
        self.next_sequence += 1;
        let message = Message::new(None, self.next_sequence, 0, body);
        self.store(info)?
            .sub_queue(info.queue_type)
            .available
            .push_back(message);
        Ok(())
    }

    fn lock_next(&mut self, info: &QueueInfo) -> ServiceBusResult<Option<(u64, Message)>> {
        if let Some(err) = self.fail_receive.clone() {
            return Err(err);
        }
        self.next_lock += 1;
        let lock = self.next_lock;
        let sub_queue = self.store(info)?.sub_queue(info.queue_type);
        let Some(mut message) = sub_queue.available.pop_front() else {
            return Ok(None);
        };
        message.delivery_count += 1;
        sub_queue.locked.insert(lock, message.clone());
        Ok(Some((lock, message)))
    }

    fn peek_page(
        &mut self,
        info: &QueueInfo,
        from_sequence: i64,
        page_size: usize,
    ) -> ServiceBusResult<Vec<Message>> {
        let sub_queue = self.store(info)?.sub_queue(info.queue_type);
        let mut page: Vec<Message> = sub_queue
            .available
            .iter()
            .chain(sub_queue.locked.values())
            .filter(|m| m.sequence >= from_sequence)
            .cloned()
            .collect();
        page.sort_by_key(|m| m.sequence);
        page.truncate(page_size);
        Ok(page)
    }
}

/// Counters the tests assert against.
#[derive(Debug, Default)]
pub struct GatewayStats {
    pub streams_started: AtomicUsize,
    pub completed: AtomicUsize,
    pub abandoned: AtomicUsize,
    pub sent: AtomicUsize,
    pub closed: AtomicUsize,
}

impl GatewayStats {
    pub fn streams_started(&self) -> usize {
        self.streams_started.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Queue gateway backed by process memory.
///
/// # Examples
///
/// ```no_run
/// use server::gateway::{InMemoryGateway, QueueGateway};
///
/// # async fn example() -> server::service_bus_manager::ServiceBusResult<()> {
/// let gateway = InMemoryGateway::new();
/// gateway.seed_text("orders", false, &["a", "b"]).await;
///
/// let handle = gateway.open("orders", false, true).await?;
/// assert_eq!(gateway.count(&handle).await?, 2);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryGateway {
    state: Arc<Mutex<BrokerState>>,
    stats: Arc<GatewayStats>,
    next_handle: Arc<AtomicU64>,
    max_delivery_count: u32,
    receive_batch: usize,
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::with_max_delivery_count(DEFAULT_MAX_DELIVERY_COUNT)
    }

    pub fn with_max_delivery_count(max_delivery_count: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            stats: Arc::new(GatewayStats::default()),
            next_handle: Arc::new(AtomicU64::new(1)),
            max_delivery_count,
            receive_batch: 1,
        }
    }

    /// Makes receive streams lock up to `size` messages per poll, the way a
    /// transport with read-ahead does.
    pub fn with_receive_batch(mut self, size: usize) -> Self {
        self.receive_batch = size.max(1);
        self
    }

    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    /// Creates an empty queue (with its dead-letter sub-queue).
    pub async fn create_queue(&self, name: &str) {
        let mut state = self.state.lock().await;
        state.queues.entry(name.to_string()).or_default();
    }

    /// Creates the queue if needed and appends text messages to it.
    pub async fn seed_text(&self, name: &str, dead_letter: bool, bodies: &[&str]) {
        let info = QueueInfo {
            name: name.to_string(),
            queue_type: QueueType::from_dead_letter_flag(dead_letter),
        };
        let mut state = self.state.lock().await;
        state.queues.entry(name.to_string()).or_default();
        for body in bodies {
            // The queue was created above, so enqueue cannot miss it.
            let _ = state.enqueue(&info, body.as_bytes().to_vec());
        }
    }

    /// Messages currently on a sub-queue, including locked ones.
    pub async fn message_count(&self, name: &str, dead_letter: bool) -> usize {
        let mut state = self.state.lock().await;
        state
            .queues
            .get_mut(name)
            .map(|store| {
                store
                    .sub_queue(QueueType::from_dead_letter_flag(dead_letter))
                    .len()
            })
            .unwrap_or(0)
    }

    /// Messages currently locked by a receiver and not yet settled.
    pub async fn locked_count(&self, name: &str, dead_letter: bool) -> usize {
        let mut state = self.state.lock().await;
        state
            .queues
            .get_mut(name)
            .map(|store| {
                store
                    .sub_queue(QueueType::from_dead_letter_flag(dead_letter))
                    .locked
                    .len()
            })
            .unwrap_or(0)
    }

    /// Text bodies currently available on a sub-queue, in delivery order.
    pub async fn bodies(&self, name: &str, dead_letter: bool) -> Vec<String> {
        let mut state = self.state.lock().await;
        state
            .queues
            .get_mut(name)
            .map(|store| {
                store
                    .sub_queue(QueueType::from_dead_letter_flag(dead_letter))
                    .available
                    .iter()
                    .map(|m| m.body_text().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn open_handle_count(&self) -> usize {
        self.state.lock().await.open_handles.len()
    }

    /// Makes every subsequent `open` fail with `Unauthorized`.
    pub async fn deny_access(&self) {
        self.state.lock().await.denied = true;
    }

    /// Lets `successful` sends through, then fails every later send.
    pub async fn fail_sends_after(&self, successful: usize) {
        self.state.lock().await.fail_send_after = Some(successful);
    }

    /// Makes every subsequent receive fail with `error`.
    pub async fn fail_receives_with(&self, error: ServiceBusError) {
        self.state.lock().await.fail_receive = Some(error);
    }
}

struct ReceiveState {
    gateway: InMemoryGateway,
    info: QueueInfo,
    buffer: DeliveryBuffer,
    failure: Option<ServiceBusError>,
    finished: bool,
}

struct InMemoryAck {
    state: Arc<Mutex<BrokerState>>,
    stats: Arc<GatewayStats>,
    info: QueueInfo,
    lock: u64,
    max_delivery_count: u32,
}

#[async_trait]
impl Acknowledge for InMemoryAck {
    async fn settle(self: Box<Self>, disposition: Disposition) -> ServiceBusResult<()> {
        let mut state = self.state.lock().await;
        let store = state.store(&self.info)?;
        let message = store
            .sub_queue(self.info.queue_type)
            .locked
            .remove(&self.lock)
            .ok_or_else(|| ServiceBusError::Transport {
                operation: "settle".to_string(),
                message: format!("lock {} lost or already settled", self.lock),
            })?;

        match disposition {
            Disposition::Complete => {
                self.stats.completed.fetch_add(1, Ordering::SeqCst);
            }
            Disposition::Abandon => {
                self.stats.abandoned.fetch_add(1, Ordering::SeqCst);
                if self.info.queue_type == QueueType::Main
                    && message.delivery_count >= self.max_delivery_count
                {
                    log::debug!(
                        "Message {} exceeded max delivery count, moving to dead-letter",
                        message.display_id()
                    );
                    store.dead_letter.available.push_back(message);
                } else {
                    store
                        .sub_queue(self.info.queue_type)
                        .available
                        .push_back(message);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueGateway for InMemoryGateway {
    async fn open(
        &self,
        name: &str,
        dead_letter: bool,
        high_throughput: bool,
    ) -> ServiceBusResult<QueueHandle> {
        let info = QueueInfo::new(name, QueueType::from_dead_letter_flag(dead_letter))
            .map_err(|e| ServiceBusError::invalid_configuration(e.to_string()))?;

        let mut state = self.state.lock().await;
        if state.denied {
            return Err(ServiceBusError::Unauthorized {
                operation: format!("open {info}"),
            });
        }
        state.store(&info)?;

        let handle = QueueHandle::new(
            self.next_handle.fetch_add(1, Ordering::SeqCst),
            info.clone(),
            high_throughput,
        );
        state.open_handles.insert(handle.id(), info);
        Ok(handle)
    }

    async fn count(&self, handle: &QueueHandle) -> ServiceBusResult<usize> {
        let mut state = self.state.lock().await;
        state.ensure_open(handle)?;
        let info = handle.info().clone();
        Ok(state.store(&info)?.sub_queue(info.queue_type).len())
    }

    async fn peek_batch(
        &self,
        handle: &QueueHandle,
        page_size: u32,
    ) -> ServiceBusResult<MessageStream> {
        self.state.lock().await.ensure_open(handle)?;
        self.stats.streams_started.fetch_add(1, Ordering::SeqCst);

        let state = self.state.clone();
        let info = handle.info().clone();
        let page_size = page_size.max(1) as usize;

        let pages = stream::unfold(Some(0i64), move |cursor| {
            let state = state.clone();
            let info = info.clone();
            async move {
                let from_sequence = cursor?;
                let page = state.lock().await.peek_page(&info, from_sequence, page_size);
                match page {
                    Err(e) => Some((vec![Err(e)], None)),
                    Ok(page) if page.is_empty() => {
                        Some((vec![Err(ServiceBusError::QueueEmpty)], None))
                    }
                    Ok(page) => {
                        let next = page.last().map(|m| m.sequence + 1);
                        let items = page.into_iter().map(|m| Ok(Delivery::peeked(m))).collect();
                        Some((items, next))
                    }
                }
            }
        });

        Ok(MessageStream::new(pages.flat_map(stream::iter).boxed()))
    }

    async fn receive_stream(&self, handle: &QueueHandle) -> ServiceBusResult<MessageStream> {
        self.state.lock().await.ensure_open(handle)?;
        self.stats.streams_started.fetch_add(1, Ordering::SeqCst);

        let buffer = DeliveryBuffer::new();
        let state = ReceiveState {
            gateway: self.clone(),
            info: handle.info().clone(),
            buffer: buffer.clone(),
            failure: None,
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

                let mut locked = 0;
                while locked < state.gateway.receive_batch {
                    match state.gateway.lock_delivery(&state.info).await {
                        Ok(Some(delivery)) => {
                            state.buffer.push(delivery).await;
                            locked += 1;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            state.failure = Some(e);
                            break;
                        }
                    }
                }
                if locked == 0 && state.failure.is_none() {
                    state.finished = true;
                    return Some((Err(ServiceBusError::QueueEmpty), state));
                }
            }
        });

        Ok(MessageStream::buffered(deliveries.boxed(), buffer))
    }

    async fn receive_one(&self, handle: &QueueHandle) -> ServiceBusResult<Delivery> {
        self.state.lock().await.ensure_open(handle)?;
        self.lock_delivery(handle.info())
            .await?
            .ok_or(ServiceBusError::QueueEmpty)
    }

    async fn send(&self, handle: &QueueHandle, payload: &[u8]) -> ServiceBusResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_open(handle)?;

        if let Some(remaining) = state.fail_send_after {
            if remaining == 0 {
                return Err(ServiceBusError::Transport {
                    operation: format!("send to {}", handle.info()),
                    message: "injected send failure".to_string(),
                });
            }
            state.fail_send_after = Some(remaining - 1);
        }

        state.enqueue(handle.info(), payload.to_vec())?;
        self.stats.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self, handle: &QueueHandle) -> ServiceBusResult<CloseOutcome> {
        let mut state = self.state.lock().await;
        match state.open_handles.remove(&handle.id()) {
            Some(_) => {
                self.stats.closed.fetch_add(1, Ordering::SeqCst);
                Ok(CloseOutcome::Closed)
            }
            None => Ok(CloseOutcome::NothingToClose),
        }
    }
}

impl InMemoryGateway {
    async fn lock_delivery(&self, info: &QueueInfo) -> ServiceBusResult<Option<Delivery>> {
        let locked = self.state.lock().await.lock_next(info)?;
        Ok(locked.map(|(lock, message)| {
            let ack = InMemoryAck {
                state: self.state.clone(),
                stats: self.stats.clone(),
                info: info.clone(),
                lock,
                max_delivery_count: self.max_delivery_count,
            };
            Delivery::new(message, Box::new(ack))
        }))
    }
}
