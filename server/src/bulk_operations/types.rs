//! Types shared by the bulk engine, the policies and their callers.

use crate::gateway::GatewaySettings;
use crate::service_bus_manager::errors::ServiceBusError;
use serde::Deserialize;
use std::time::Duration;

/// Tuning for bulk operations.
///
/// Every field is optional so a partially filled config section still
/// deserializes; accessors fall back to the defaults.
///
/// # Examples
///
/// ```no_run
/// use server::bulk_operations::BatchConfig;
///
/// let config = BatchConfig::default();
/// assert_eq!(config.concurrency(), 3);
/// assert_eq!(config.status_interval(), 50);
///
/// let config = BatchConfig::new(8, 10);
/// assert_eq!(config.concurrency(), 8);
/// ```
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Worker pool size for destructive operations (default: 3)
    concurrency: Option<usize>,
    /// Messages between two status reports (default: 50)
    status_interval: Option<usize>,
    /// Pause after each status boundary when throttling (default: 250)
    throttle_delay_ms: Option<u64>,
    /// Messages requested per receive call (default: 50)
    receive_batch_size: Option<u32>,
    /// Receive window before a source counts as drained (default: 5)
    receive_timeout_secs: Option<u64>,
    /// Messages requested per peek call (default: 100)
    peek_page_size: Option<u32>,
    /// Prefetch window for high-throughput handles (default: 250)
    prefetch_count: Option<u32>,
    /// Deadline for connection and link setup (default: 30)
    open_timeout_secs: Option<u64>,
}

impl BatchConfig {
    pub fn new(concurrency: usize, status_interval: usize) -> Self {
        Self {
            concurrency: Some(concurrency),
            status_interval: Some(status_interval),
            ..Self::default()
        }
    }

    pub fn with_throttle_delay(mut self, delay: Duration) -> Self {
        self.throttle_delay_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency.unwrap_or(3).max(1)
    }

    pub fn status_interval(&self) -> usize {
        self.status_interval.unwrap_or(50).max(1)
    }

    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.throttle_delay_ms.unwrap_or(250))
    }

    pub fn receive_batch_size(&self) -> u32 {
        self.receive_batch_size.unwrap_or(50)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs.unwrap_or(5))
    }

    pub fn peek_page_size(&self) -> u32 {
        self.peek_page_size.unwrap_or(100)
    }

    pub fn prefetch_count(&self) -> u32 {
        self.prefetch_count.unwrap_or(250)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs.unwrap_or(30))
    }

    /// Transport settings derived from this config.
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            prefetch_count: self.prefetch_count(),
            receive_batch_size: self.receive_batch_size(),
            receive_timeout: self.receive_timeout(),
            peek_page_size: self.peek_page_size(),
            open_timeout: self.open_timeout(),
        }
    }
}

/// Event emitted by a running bulk operation.
///
/// `Status` and `Found` are informational; exactly one `Success` or `Fatal`
/// ends every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressReport {
    /// The stream is open and the run is about to dispatch messages
    Started { total: usize },
    /// Periodic progress, emitted every `status_interval` messages
    Status { processed: usize, total: usize },
    /// A tidy pattern matched; carries the matched text
    Found(String),
    /// The run finished; `processed` may be below the expected total
    Success { processed: usize },
    /// The run stopped on an error
    Fatal(ServiceBusError),
}

impl ProgressReport {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Fatal(_))
    }
}

/// Sending half of a progress channel.
///
/// Sends wait for channel capacity, so a slow reader slows the engine down
/// instead of growing a buffer. A sink without a reader discards events.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<flume::Sender<ProgressReport>>,
}

impl ProgressSink {
    /// A bounded channel and its sink.
    pub fn channel(capacity: usize) -> (Self, flume::Receiver<ProgressReport>) {
        let (sender, receiver) = flume::bounded(capacity.max(1));
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub async fn send(&self, report: ProgressReport) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send_async(report).await.is_err() {
            log::debug!("Progress receiver dropped, discarding report");
        }
    }

    pub async fn status(&self, processed: usize, total: usize) {
        self.send(ProgressReport::Status { processed, total }).await;
    }

    pub async fn found(&self, matched: impl Into<String>) {
        self.send(ProgressReport::Found(matched.into())).await;
    }
}

/// Which transport stream feeds a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Destructive receive; every delivery gets settled
    Receive,
    /// Non-destructive peek in pages of the given size
    Peek { page_size: u32 },
}

/// Parameters of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: StreamMode,
    /// Count observed before the run; the run stops once it is reached
    pub expected_total: usize,
    /// Maximum number of in-flight actions
    pub concurrency: usize,
    /// Pause after each status boundary
    pub throttle: bool,
}

impl RunOptions {
    pub fn receive(expected_total: usize, concurrency: usize) -> Self {
        Self {
            mode: StreamMode::Receive,
            expected_total,
            concurrency,
            throttle: false,
        }
    }

    pub fn peek(expected_total: usize, page_size: u32) -> Self {
        Self {
            mode: StreamMode::Peek { page_size },
            expected_total,
            // Single worker keeps pulled lines in queue order.
            concurrency: 1,
            throttle: false,
        }
    }

    pub fn throttled(mut self, throttle: bool) -> Self {
        self.throttle = throttle;
        self
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BulkOperationResult {
    /// Count observed before the run
    pub total_requested: usize,
    /// Messages dispatched to the policy
    pub processed: usize,
}

impl BulkOperationResult {
    pub fn new(total_requested: usize, processed: usize) -> Self {
        Self {
            total_requested,
            processed,
        }
    }

    /// `true` when the source ran dry before the observed count was reached.
    pub fn ended_early(&self) -> bool {
        self.processed < self.total_requested
    }
}
