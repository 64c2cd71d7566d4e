//! Bounded in-memory buffer of sanitized execution records.
//!
//! The buffer is the only place records wait between capture and
//! transmission. It is bounded: when a push would exceed capacity the oldest
//! records are evicted and counted, which is the documented backpressure
//! behaviour under sustained delivery failure.
//!
//! # Snapshot-then-clear
//!
//! [`ResultBuffer::flush`] takes the whole content and leaves the buffer
//! empty inside one critical section. Records pushed while the snapshot is
//! being sent land in the empty buffer and belong to the next flush. If the
//! send fails, [`ResultBuffer::requeue`] puts the snapshot back **in front
//! of** those newer records so chronological order survives.
//!
//! ```text
//!   push(a) push(b)      flush() ──► [a, b] ──► send (suspended) ──► fails
//!                           │                                           │
//!   buffer: [a, b] ──────► []  ◄── push(c) ── [c] ◄── requeue([a, b]) ──┘
//!                                                  = [a, b, c]
//! ```
//!
//! The lock is a `std::sync::Mutex`; it is never held across an `.await`.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::warn;

use crate::model::ExecutionRecord;

#[derive(Debug, Default)]
struct BufferState {
    records: VecDeque<ExecutionRecord>,
    dropped: u64,
}

/// Bounded FIFO of [`ExecutionRecord`]s with drop-oldest overflow.
///
/// # Example
///
/// ```
/// use testwire::buffer::ResultBuffer;
///
/// let buffer = ResultBuffer::new(100);
/// assert!(buffer.is_empty());
/// assert_eq!(buffer.flush().len(), 0);
/// ```
#[derive(Debug)]
pub struct ResultBuffer {
    capacity: usize,
    state: Mutex<BufferState>,
}

impl ResultBuffer {
    /// Creates a buffer holding at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(BufferState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState> {
        // A panic while holding the lock can't leave the deque half-updated,
        // so a poisoned lock is still safe to use.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a record, evicting the oldest records if over capacity.
    ///
    /// Returns the number of records evicted by this call.
    pub fn push(&self, record: ExecutionRecord) -> usize {
        let mut state = self.lock();
        state.records.push_back(record);
        let evicted = Self::enforce_capacity(&mut state, self.capacity);
        if evicted > 0 {
            warn!(
                evicted,
                total_dropped = state.dropped,
                capacity = self.capacity,
                "result buffer full, dropped oldest records"
            );
        }
        evicted
    }

    /// Takes every buffered record, oldest first, and leaves the buffer empty.
    pub fn flush(&self) -> Vec<ExecutionRecord> {
        let mut state = self.lock();
        std::mem::take(&mut state.records).into()
    }

    /// Puts an undelivered snapshot back in front of newer records.
    ///
    /// `records` must be a snapshot returned by [`flush`](Self::flush). If
    /// the merged content exceeds capacity the oldest records are evicted
    /// and counted. Returns the number evicted.
    pub fn requeue(&self, records: Vec<ExecutionRecord>) -> usize {
        if records.is_empty() {
            return 0;
        }

        let mut state = self.lock();
        let newer = std::mem::take(&mut state.records);
        let mut merged: VecDeque<ExecutionRecord> = records.into();
        merged.extend(newer);
        state.records = merged;

        let evicted = Self::enforce_capacity(&mut state, self.capacity);
        if evicted > 0 {
            warn!(
                evicted,
                total_dropped = state.dropped,
                "dropped oldest records while re-queuing an undelivered batch"
            );
        }
        evicted
    }

    fn enforce_capacity(state: &mut BufferState, capacity: usize) -> usize {
        let excess = state.records.len().saturating_sub(capacity);
        state.records.drain(..excess);
        state.dropped += excess as u64;
        excess
    }

    /// Records currently buffered.
    pub fn count(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Total records evicted since creation. Never decreases.
    pub fn dropped_count(&self) -> u64 {
        self.lock().dropped
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
