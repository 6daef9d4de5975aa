//! Concurrency limiter bounding the number of in-flight jobs.
//!
//! Backed by tokio's fair semaphore: waiters are queued FIFO and a released
//! slot is handed straight to the oldest waiter. Slots are held through an
//! RAII permit so every exit path after `acquire` releases exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Default number of simultaneous jobs
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimiterError {
    #[error("limiter capacity must be at least 1")]
    ZeroCapacity,

    #[error("limiter is closed")]
    Closed,
}

#[derive(Debug)]
struct LimiterInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

/// Counting limiter with a FIFO wait queue
#[derive(Debug, Clone)]
pub struct Limiter {
    inner: Arc<LimiterInner>,
}

impl Limiter {
    /// Create a limiter with `capacity` slots
    pub fn new(capacity: usize) -> Result<Self, LimiterError> {
        if capacity == 0 {
            return Err(LimiterError::ZeroCapacity);
        }

        Ok(Self {
            inner: Arc::new(LimiterInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                in_use: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Slots currently held
    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::SeqCst)
    }

    /// Highest number of slots ever held at once
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Wait for a free slot.
    ///
    /// Dropping the returned future while queued gives up the place in line
    /// without consuming a slot.
    pub async fn acquire(&self) -> Result<LimiterPermit, LimiterError> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LimiterError::Closed)?;

        let now = self.inner.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);

        Ok(LimiterPermit {
            inner: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Reject all current and future waiters
    pub fn close(&self) {
        self.inner.semaphore.close();
    }
}

/// A held slot. Released on drop.
#[derive(Debug)]
pub struct LimiterPermit {
    inner: Arc<LimiterInner>,
    // Dropped after `Drop::drop` runs, so the counter falls before the slot is handed on.
    _permit: OwnedSemaphorePermit,
}

impl LimiterPermit {
    /// Release the slot explicitly
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.inner.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}
