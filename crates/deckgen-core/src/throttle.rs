//! Global request throttle shared by every outbound call.
//!
//! Calls are dispatched in submission order, with at most `max_concurrent`
//! running at once and at least `min_interval` between two dispatches.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;

use crate::config::ThrottleConfig;

/// FIFO concurrency and pacing limiter.
#[derive(Debug)]
pub struct RequestThrottler {
    max_concurrent: usize,
    min_interval: Duration,
    /// Time of the previous dispatch. The tokio mutex is fair, so holding it
    /// while waiting for a slot keeps dispatch in queue order.
    gate: Mutex<Option<Instant>>,
    slots: Semaphore,
    active: AtomicUsize,
    queued: AtomicUsize,
    peak: AtomicUsize,
    dispatched: AtomicUsize,
}

impl RequestThrottler {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            min_interval,
            gate: Mutex::new(None),
            slots: Semaphore::new(max_concurrent),
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            dispatched: AtomicUsize::new(0),
        }
    }

    pub fn from_config(cfg: &ThrottleConfig) -> Self {
        Self::new(cfg.max_concurrent, Duration::from_millis(cfg.min_interval_ms))
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Calls currently running.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Calls waiting for their turn.
    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Highest `active_count` observed.
    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    /// Calls dispatched so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::Acquire)
    }

    /// Wait for a turn, then run `call`.
    ///
    /// Dropping the returned future while queued leaves the queue; dropping it
    /// while running frees the slot.
    pub async fn execute<F, Fut, T>(&self, call: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let waiting = QueuedGuard::enter(&self.queued);
        let permit = {
            let mut last_dispatch = self.gate.lock().await;
            // The semaphore is never closed, so this only fails if it were.
            let permit = self.slots.acquire().await.ok();
            if let Some(prev) = *last_dispatch {
                tokio::time::sleep_until(prev + self.min_interval).await;
            }
            *last_dispatch = Some(Instant::now());
            permit
        };
        drop(waiting);

        let _slot = ActiveGuard::enter(self, permit);
        call().await
    }
}

/// Decrements the queued count when the caller is dispatched or gives up.
struct QueuedGuard<'a> {
    queued: &'a AtomicUsize,
}

impl<'a> QueuedGuard<'a> {
    fn enter(queued: &'a AtomicUsize) -> Self {
        queued.fetch_add(1, Ordering::AcqRel);
        Self { queued }
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Holds a concurrency slot; releases it when the call completes or is dropped.
struct ActiveGuard<'a> {
    throttler: &'a RequestThrottler,
    _permit: Option<SemaphorePermit<'a>>,
}

impl<'a> ActiveGuard<'a> {
    fn enter(throttler: &'a RequestThrottler, permit: Option<SemaphorePermit<'a>>) -> Self {
        let now_active = throttler.active.fetch_add(1, Ordering::AcqRel) + 1;
        throttler.peak.fetch_max(now_active, Ordering::AcqRel);
        let n = throttler.dispatched.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(active = now_active, dispatched = n, "throttle dispatch");
        Self {
            throttler,
            _permit: permit,
        }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.throttler.active.fetch_sub(1, Ordering::AcqRel);
    }
}
