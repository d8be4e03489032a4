//! The bulk operation driver.
//!
//! One run pumps a gateway stream, dispatches every delivery to a bounded
//! worker pool where the policy decides its disposition, and reports
//! progress through a [`ProgressSink`]. A run ends when the observed count
//! is reached, when the source is exhausted, or on the first fatal error,
//! and in every case only after all dispatched workers have finished.

use super::policy::MessagePolicy;
use super::types::{
    BatchConfig, BulkOperationResult, ProgressReport, ProgressSink, RunOptions, StreamMode,
};
use crate::gateway::{Delivery, MessageStream, QueueGateway, QueueHandle};
use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use crate::taskpool::TaskPool;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

/// Why the pump loop stopped.
#[derive(Debug, PartialEq, Eq)]
enum StopReason {
    TargetReached,
    Exhausted,
    WorkerFailed,
}

pub struct BulkOperationEngine {
    config: BatchConfig,
}

impl BulkOperationEngine {
    pub fn new(config: BatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Runs `policy` over the messages of `handle`.
    ///
    /// Emits `Status` events every `status_interval` messages and ends the
    /// event sequence with exactly one `Success` or `Fatal`. The returned
    /// result mirrors that terminal event.
    pub async fn run(
        &self,
        gateway: &dyn QueueGateway,
        handle: &QueueHandle,
        options: RunOptions,
        policy: Arc<dyn MessagePolicy>,
        events: &ProgressSink,
    ) -> ServiceBusResult<BulkOperationResult> {
        let started = Instant::now();
        log::info!(
            "Starting {} on {} ({} expected, concurrency {})",
            policy.name(),
            handle.info(),
            options.expected_total,
            options.concurrency
        );

        let outcome = self.drive(gateway, handle, options, policy.clone(), events).await;

        match &outcome {
            Ok(result) => {
                log::info!(
                    "{} on {} finished: {} of {} processed in {:?}",
                    policy.name(),
                    handle.info(),
                    result.processed,
                    result.total_requested,
                    started.elapsed()
                );
                events
                    .send(ProgressReport::Success {
                        processed: result.processed,
                    })
                    .await;
            }
            Err(e) => {
                log::error!("{} on {} failed: {e}", policy.name(), handle.info());
                events.send(ProgressReport::Fatal(e.clone())).await;
            }
        }
        outcome
    }

    async fn drive(
        &self,
        gateway: &dyn QueueGateway,
        handle: &QueueHandle,
        options: RunOptions,
        policy: Arc<dyn MessagePolicy>,
        events: &ProgressSink,
    ) -> ServiceBusResult<BulkOperationResult> {
        if options.expected_total == 0 {
            return Err(ServiceBusError::NoMessagesToProcess);
        }

        let mut stream = match options.mode {
            StreamMode::Receive => gateway.receive_stream(handle).await?,
            StreamMode::Peek { page_size } => gateway.peek_batch(handle, page_size).await?,
        };

        events
            .send(ProgressReport::Started {
                total: options.expected_total,
            })
            .await;

        let pool = TaskPool::new(options.concurrency);
        let mut processed = 0usize;

        let pumped = self
            .pump(&mut stream, &pool, options, &policy, events, &mut processed)
            .await;

        // Ending the subscription before draining stops further deliveries;
        // anything it had read ahead goes back to the queue.
        let released = stream.release_pending().await;
        if released > 0 {
            log::debug!("Released {released} buffered messages that were never dispatched");
        }
        pool.drain().await;
        log::debug!("All workers drained after {processed} messages");

        if let Some(worker_error) = pool.take_failure() {
            return Err(worker_error);
        }
        let reason = pumped?;
        log::debug!("Pump stopped: {reason:?}");

        policy.finish(events).await?;
        Ok(BulkOperationResult::new(options.expected_total, processed))
    }

    async fn pump(
        &self,
        stream: &mut MessageStream,
        pool: &TaskPool,
        options: RunOptions,
        policy: &Arc<dyn MessagePolicy>,
        events: &ProgressSink,
        processed: &mut usize,
    ) -> ServiceBusResult<StopReason> {
        let interval = self.config.status_interval();

        loop {
            let next = tokio::select! {
                biased;
                () = pool.cancelled() => return Ok(StopReason::WorkerFailed),
                next = stream.next() => next,
            };

            let delivery = match next {
                None | Some(Err(ServiceBusError::QueueEmpty)) => {
                    log::info!(
                        "Source exhausted after {} of {} messages",
                        processed,
                        options.expected_total
                    );
                    return Ok(StopReason::Exhausted);
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(delivery)) => delivery,
            };

            let Some(slot) = pool.reserve().await? else {
                release(delivery).await;
                return Ok(StopReason::WorkerFailed);
            };
            pool.spawn(slot, process(delivery, policy.clone(), events.clone()));
            *processed += 1;

            if *processed % interval == 0 {
                log::debug!("Batch boundary at {} messages", processed);
                events.status(*processed, options.expected_total).await;
                if options.throttle {
                    tokio::time::sleep(self.config.throttle_delay()).await;
                }
            }

            // The boundary message has been dispatched; stop only now.
            if *processed >= options.expected_total {
                return Ok(StopReason::TargetReached);
            }
        }
    }
}

/// One worker: apply the policy, then settle the delivery exactly once.
async fn process(
    delivery: Delivery,
    policy: Arc<dyn MessagePolicy>,
    events: ProgressSink,
) -> ServiceBusResult<()> {
    let outcome = policy.apply(delivery.message(), &events).await;
    match outcome {
        Ok(disposition) => delivery.settle(disposition).await,
        Err(e) => {
            log::warn!(
                "{} failed for message {}, abandoning it",
                policy.name(),
                delivery.message().display_id()
            );
            release(delivery).await;
            Err(e)
        }
    }
}

async fn release(delivery: Delivery) {
    let id = delivery.message().display_id().into_owned();
    if let Err(e) = delivery.abandon().await {
        log::warn!("Failed to abandon message {id}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk_operations::policy::MessagePolicy;
    use crate::gateway::{Disposition, InMemoryGateway};
    use crate::model::Message;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingPolicy {
        seen: AtomicUsize,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl MessagePolicy for CountingPolicy {
        fn name(&self) -> &'static str {
            "count"
        }

        async fn apply(
            &self,
            _message: &Message,
            _events: &ProgressSink,
        ) -> ServiceBusResult<Disposition> {
            let seen = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
            if Some(seen) == self.fail_on {
                return Err(ServiceBusError::Transport {
                    operation: "apply".to_string(),
                    message: "boom".to_string(),
                });
            }
            Ok(Disposition::Complete)
        }
    }

    async fn seeded(count: usize) -> (InMemoryGateway, QueueHandle) {
        seeded_in(InMemoryGateway::new(), count).await
    }

    async fn seeded_in(gateway: InMemoryGateway, count: usize) -> (InMemoryGateway, QueueHandle) {
        let bodies: Vec<String> = (0..count).map(|i| format!("m{i}")).collect();
        let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
        gateway.seed_text("q", false, &refs).await;
        let handle = gateway.open("q", false, true).await.unwrap();
        (gateway, handle)
    }

    #[tokio::test]
    async fn test_stops_exactly_at_expected_total() {
        let (gateway, handle) = seeded(10).await;
        let engine = BulkOperationEngine::new(BatchConfig::new(3, 50));
        let policy = Arc::new(CountingPolicy {
            seen: AtomicUsize::new(0),
            fail_on: None,
        });

        let result = engine
            .run(
                &gateway,
                &handle,
                RunOptions::receive(4, 3),
                policy.clone(),
                &ProgressSink::disabled(),
            )
            .await
            .unwrap();

        assert_eq!(result.processed, 4);
        assert_eq!(policy.seen.load(Ordering::SeqCst), 4);
        assert_eq!(gateway.message_count("q", false).await, 6);
        assert_eq!(gateway.locked_count("q", false).await, 0);
    }

    #[tokio::test]
    async fn test_worker_failure_is_fatal_and_abandons() {
        let (gateway, handle) = seeded(5).await;
        let engine = BulkOperationEngine::new(BatchConfig::new(1, 50));
        let policy = Arc::new(CountingPolicy {
            seen: AtomicUsize::new(0),
            fail_on: Some(2),
        });
        let (sink, receiver) = ProgressSink::channel(8);

        let err = engine
            .run(&gateway, &handle, RunOptions::receive(5, 1), policy, &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceBusError::Transport { .. }));
        assert_eq!(gateway.locked_count("q", false).await, 0);
        assert_eq!(gateway.message_count("q", false).await, 4);
        let last = receiver.drain().last();
        assert_eq!(last, Some(ProgressReport::Fatal(err)));
    }

    #[tokio::test]
    async fn test_zero_expected_is_rejected() {
        let (gateway, handle) = seeded(1).await;
        let engine = BulkOperationEngine::new(BatchConfig::default());
        let policy = Arc::new(CountingPolicy {
            seen: AtomicUsize::new(0),
            fail_on: None,
        });

        let err = engine
            .run(
                &gateway,
                &handle,
                RunOptions::receive(0, 1),
                policy,
                &ProgressSink::disabled(),
            )
            .await
            .unwrap_err();

        assert_eq!(err, ServiceBusError::NoMessagesToProcess);
        assert_eq!(gateway.stats().streams_started(), 0);
    }

    fn counting(fail_on: Option<usize>) -> Arc<CountingPolicy> {
        Arc::new(CountingPolicy {
            seen: AtomicUsize::new(0),
            fail_on,
        })
    }

    #[tokio::test]
    async fn test_exhausted_source_succeeds_with_processed_count() {
        let (gateway, handle) = seeded(5).await;
        // One message stays locked elsewhere, so the stream runs dry at 4.
        let held = gateway.receive_one(&handle).await.unwrap();
        let engine = BulkOperationEngine::new(BatchConfig::new(2, 50));
        let (sink, receiver) = ProgressSink::channel(8);

        let result = engine
            .run(&gateway, &handle, RunOptions::receive(5, 2), counting(None), &sink)
            .await
            .unwrap();

        assert_eq!(result, BulkOperationResult::new(5, 4));
        assert!(result.ended_early());
        assert_eq!(
            receiver.drain().collect::<Vec<_>>(),
            vec![
                ProgressReport::Started { total: 5 },
                ProgressReport::Success { processed: 4 },
            ]
        );

        held.abandon().await.unwrap();
        assert_eq!(gateway.message_count("q", false).await, 1);
    }

    #[tokio::test]
    async fn test_read_ahead_is_released_when_target_reached() {
        let (gateway, handle) = seeded_in(InMemoryGateway::new().with_receive_batch(10), 10).await;
        let engine = BulkOperationEngine::new(BatchConfig::new(1, 50));

        let result = engine
            .run(
                &gateway,
                &handle,
                RunOptions::receive(4, 1),
                counting(None),
                &ProgressSink::disabled(),
            )
            .await
            .unwrap();

        assert_eq!(result.processed, 4);
        assert_eq!(gateway.locked_count("q", false).await, 0);
        assert_eq!(gateway.message_count("q", false).await, 6);
        assert_eq!(gateway.stats().completed(), 4);
        assert_eq!(gateway.stats().abandoned(), 6);
    }

    #[tokio::test]
    async fn test_read_ahead_is_released_after_worker_failure() {
        let (gateway, handle) = seeded_in(InMemoryGateway::new().with_receive_batch(10), 10).await;
        let engine = BulkOperationEngine::new(BatchConfig::new(1, 50));

        let err = engine
            .run(
                &gateway,
                &handle,
                RunOptions::receive(10, 1),
                counting(Some(3)),
                &ProgressSink::disabled(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceBusError::Transport { .. }));
        assert_eq!(gateway.locked_count("q", false).await, 0);
        assert_eq!(gateway.stats().completed(), 2);
        assert_eq!(gateway.message_count("q", false).await, 8);
    }
}
