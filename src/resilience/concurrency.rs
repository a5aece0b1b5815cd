//! Global cap on simultaneously in-flight remote calls.
//!
//! Waiters queue in FIFO order on a tokio semaphore up to `max_queue_depth`; once the queue
//! is full new calls fail fast with [`CapacityExceeded::QueueFull`]. Waiting is bounded by
//! the caller's deadline.

use crate::config::ConcurrencyConfig;
use crate::error::{CapacityExceeded, GuardError, GuardResult};
use crate::resilience::Deadline;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_in_flight: usize,
    max_queue_depth: usize,
    queued: AtomicUsize,
}

/// Decrements the queue count when the waiter leaves the queue, however it leaves
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConcurrencyLimiter {
    pub fn new(config: &ConcurrencyConfig) -> Self {
        let max_in_flight = config.max_in_flight.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            max_queue_depth: config.max_queue_depth,
            queued: AtomicUsize::new(0),
        }
    }

    /// Acquire an in-flight slot, held until the returned permit is dropped
    pub async fn acquire(&self, deadline: Deadline) -> GuardResult<OwnedSemaphorePermit> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(permit);
        }

        let position = self.queued.fetch_add(1, Ordering::AcqRel);
        let _slot = QueueSlot(&self.queued);
        if position >= self.max_queue_depth {
            warn!(
                in_flight = self.in_flight(),
                max_queue_depth = self.max_queue_depth,
                "Concurrency queue full, rejecting call"
            );
            return Err(CapacityExceeded::QueueFull {
                max_queue_depth: self.max_queue_depth,
                in_flight: self.in_flight(),
            }
            .into());
        }

        debug!(queue_position = position, "Waiting for in-flight slot");
        match tokio::time::timeout_at(
            deadline.instant(),
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(GuardError::Internal(
                "concurrency limiter has been closed".to_string(),
            )),
            Err(_elapsed) => Err(GuardError::deadline_exceeded(
                "waiting for an in-flight slot",
            )),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.semaphore.available_permits()
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}
