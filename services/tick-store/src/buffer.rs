//! Bounded FIFO buffer between the feed and the flush path
//!
//! Producers suspend while the buffer is full instead of dropping records.
//! Free capacity is tracked by a fair semaphore, so blocked producers are
//! admitted in arrival order as soon as a drain releases slots.

use crate::record::TickRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};

/// Buffer errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer no longer accepts records
    #[error("tick buffer is closed")]
    Closed,
}

/// Fixed-capacity concurrent queue of tick records
#[derive(Debug)]
pub struct TickBuffer {
    queue: Mutex<VecDeque<TickRecord>>,
    /// One permit per free slot
    slots: Semaphore,
    readable: Notify,
    closed: AtomicBool,
    capacity: usize,
}

impl TickBuffer {
    /// Create a buffer holding at most `capacity` records
    ///
    /// The capacity is clamped to `1..=Semaphore::MAX_PERMITS`. Queue storage
    /// grows with occupancy rather than being reserved up front.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            queue: Mutex::new(VecDeque::new()),
            slots: Semaphore::new(capacity),
            readable: Notify::new(),
            closed: AtomicBool::new(false),
            capacity,
        }
    }

    /// Maximum number of buffered records
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current occupancy
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Append a record, waiting for a free slot while the buffer is full
    ///
    /// Returns the occupancy right after the insert.
    pub async fn enqueue(&self, record: TickRecord) -> Result<usize, BufferError> {
        let permit = self.slots.acquire().await.map_err(|_| BufferError::Closed)?;

        let occupancy = {
            let mut queue = self.queue.lock();
            // Checked under the queue lock so nothing lands after close().
            if self.closed.load(Ordering::Acquire) {
                return Err(BufferError::Closed);
            }
            queue.push_back(record);
            queue.len()
        };
        permit.forget();

        self.readable.notify_one();
        Ok(occupancy)
    }

    /// Remove up to `max` records in FIFO order without waiting
    pub fn drain(&self, max: usize) -> Vec<TickRecord> {
        let batch: Vec<TickRecord> = {
            let mut queue = self.queue.lock();
            let n = max.min(queue.len());
            queue.drain(..n).collect()
        };

        if !batch.is_empty() {
            self.slots.add_permits(batch.len());
        }
        batch
    }

    /// Remove up to `max` records, waiting until at least one is available
    ///
    /// Returns an empty batch only once the buffer is closed and empty.
    pub async fn drain_wait(&self, max: usize) -> Vec<TickRecord> {
        let max = max.max(1);
        loop {
            let notified = self.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.drain(max);
            if !batch.is_empty() || self.is_closed() {
                return batch;
            }

            notified.await;
        }
    }

    /// Stop accepting records
    ///
    /// Buffered records stay drainable. Producers waiting for a slot fail
    /// with [`BufferError::Closed`].
    pub fn close(&self) {
        {
            let _queue = self.queue.lock();
            self.closed.store(true, Ordering::Release);
        }
        self.slots.close();
        self.readable.notify_waiters();
    }
}
