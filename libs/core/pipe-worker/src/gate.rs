//! Admission gate
//!
//! Bounds the number of concurrently running handler tasks by a limit that
//! the rate controller can move at runtime. Waiters are woken by permit
//! release or limit increase; nothing polls.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Shared in-flight counter and concurrency limit.
#[derive(Debug)]
pub struct AdmissionGate {
    limit: AtomicUsize,
    min: usize,
    in_flight: AtomicUsize,
    processed: AtomicU64,
    released: Notify,
}

impl AdmissionGate {
    /// Create a gate starting at `initial`, never lowered below `min`.
    pub fn new(initial: usize, min: usize) -> Self {
        Self {
            limit: AtomicUsize::new(initial.max(min)),
            min,
            in_flight: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            released: Notify::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    pub fn min(&self) -> usize {
        self.min
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Admit one task if `in_flight < limit`.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let limit = self.limit();
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < limit).then_some(current + 1)
            })
            .ok()
            .map(|_| Permit {
                gate: Arc::clone(self),
            })
    }

    /// Wait until a task can be admitted.
    pub async fn acquire(self: &Arc<Self>) -> Permit {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(permit) = self.try_acquire() {
                return permit;
            }
            notified.await;
        }
    }

    /// Raise the limit by one. Returns the new limit.
    pub fn raise(&self) -> usize {
        let limit = self.limit.fetch_add(1, Ordering::AcqRel) + 1;
        self.released.notify_one();
        limit
    }

    /// Lower the limit by one unless already at the minimum.
    ///
    /// Returns the new limit, or `None` if the limit was not changed.
    /// Tasks already admitted keep running; in-flight can briefly exceed the
    /// new limit until they finish.
    pub fn lower(&self) -> Option<usize> {
        let min = self.min;
        self.limit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |limit| {
                (limit > min).then(|| limit - 1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    /// Count one finished task towards the current window.
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    /// Read and reset the window counter.
    pub fn take_processed(&self) -> u64 {
        self.processed.swap(0, Ordering::AcqRel)
    }

    fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.released.notify_one();
    }
}

/// One admitted handler task. Releases its slot on drop.
#[derive(Debug)]
pub struct Permit {
    gate: Arc<AdmissionGate>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
