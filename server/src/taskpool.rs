use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tokio_util::task::TaskTracker;

/// Bounded pool of worker tasks.
///
/// A permit is taken before a task is spawned, so at most `n_tasks` actions
/// run at once and the caller is held back while the pool is full. The first
/// failing task records its error and cancels the pool's token; tasks
/// already running are left to finish.
pub struct TaskPool {
    semaphore: Arc<Semaphore>,
    cancel_token: CancellationToken,
    tracker: TaskTracker,
    failure: Arc<Mutex<Option<ServiceBusError>>>,
}

/// A reserved place in the pool. The place is freed when the slot drops.
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl TaskPool {
    pub fn new(n_tasks: usize) -> TaskPool {
        TaskPool {
            semaphore: Arc::new(Semaphore::new(n_tasks.max(1))),
            cancel_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Waits for a free slot.
    ///
    /// Returns `None` once the pool has been cancelled by a failing task, so
    /// nothing new is dispatched after the first failure.
    pub async fn reserve(&self) -> ServiceBusResult<Option<Slot>> {
        tokio::select! {
            biased;
            () = self.cancel_token.cancelled() => Ok(None),
            permit = self.semaphore.clone().acquire_owned() => permit
                .map(|permit| Some(Slot { _permit: permit }))
                .map_err(|_| ServiceBusError::Internal("task pool is closed".to_string())),
        }
    }

    /// Spawns `func` on a slot obtained from [`TaskPool::reserve`].
    pub fn spawn<F>(&self, slot: Slot, func: F)
    where
        F: Future<Output = ServiceBusResult<()>> + Send + 'static,
    {
        let token = self.cancel_token.clone();
        let failure = self.failure.clone();
        self.tracker.spawn(async move {
            let outcome = match AssertUnwindSafe(func).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(ServiceBusError::Internal("worker panicked".to_string())),
            };

            if let Err(e) = outcome {
                log::error!("Worker failed: {e}");
                record_failure(&failure, e);
                token.cancel();
            }
            // The slot is released only after the failure is visible.
            drop(slot);
        });
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel_token.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting work and waits until every spawned task has finished.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// The first error recorded by a task, if any.
    pub fn take_failure(&self) -> Option<ServiceBusError> {
        match self.failure.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

fn record_failure(slot: &Mutex<Option<ServiceBusError>>, error: ServiceBusError) {
    let mut guard = match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.get_or_insert(error);
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.semaphore.close();
        self.cancel_token.cancel();
    }
}
