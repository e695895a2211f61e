// Bounded frame ring between the capture and processing workers
//
// The ring is the single point of backpressure in the pipeline. The capture
// worker must never wait on a slow consumer, so a push into a full ring
// evicts the oldest resident frame instead of blocking. The processing
// worker blocks on an empty ring, with a bounded wait so shutdown can
// always interrupt it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::frame::Frame;

/// Outcome of a non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame stored without evicting anything.
    Stored,
    /// Ring was full; the oldest resident frame (this sequence number)
    /// was evicted to make room.
    DroppedOldest(u64),
    /// Ring is closed; the frame was not accepted.
    Rejected,
}

/// Outcome of a bounded-wait pop.
#[derive(Debug)]
pub enum PopResult {
    Frame(Frame),
    /// No frame arrived within the wait window; the ring is still open.
    TimedOut,
    /// The ring is closed and fully drained.
    Closed,
}

struct RingInner {
    slots: VecDeque<Frame>,
    closed: bool,
}

/// Fixed-capacity FIFO ring of frames, single producer / single consumer.
///
/// Frames come out in exactly the order they went in. Closing the ring
/// rejects further pushes and wakes any blocked pop, but frames already
/// buffered remain poppable until the ring is drained.
pub struct FrameRing {
    capacity: usize,
    inner: Mutex<RingInner>,
    available: Condvar,
    pushed: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl FrameRing {
    /// Create a ring holding at most `capacity` frames. Capacity must be
    /// non-zero; a zero-capacity ring could never deliver anything.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame ring capacity must be non-zero");
        Self {
            capacity,
            inner: Mutex::new(RingInner {
                slots: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            pushed: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push a frame without ever blocking.
    ///
    /// When the ring is full the oldest resident frame is evicted and
    /// counted as dropped; freshness wins over completeness for a live
    /// feed. The evicted sequence number is reported so the caller can
    /// log what was lost.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let mut inner = self.inner.lock();
        if inner.closed {
            return PushOutcome::Rejected;
        }

        self.pushed.fetch_add(1, Ordering::SeqCst);

        let outcome = if inner.slots.len() == self.capacity {
            // Evict the oldest frame still resident.
            let evicted = inner
                .slots
                .pop_front()
                .map(|f| f.sequence())
                .unwrap_or_default();
            self.dropped.fetch_add(1, Ordering::SeqCst);
            PushOutcome::DroppedOldest(evicted)
        } else {
            PushOutcome::Stored
        };

        inner.slots.push_back(frame);
        drop(inner);
        self.available.notify_one();
        outcome
    }

    /// Pop the oldest frame, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `Closed` only once the ring is closed *and* empty, so a
    /// close during drain never loses buffered frames.
    pub fn pop(&self, timeout: Duration) -> PopResult {
        let mut inner = self.inner.lock();
        loop {
            if let Some(frame) = inner.slots.pop_front() {
                self.delivered.fetch_add(1, Ordering::SeqCst);
                return PopResult::Frame(frame);
            }
            if inner.closed {
                return PopResult::Closed;
            }
            if self.available.wait_for(&mut inner, timeout).timed_out() {
                // Re-check once: a push may have raced the timeout.
                if let Some(frame) = inner.slots.pop_front() {
                    self.delivered.fetch_add(1, Ordering::SeqCst);
                    return PopResult::Frame(frame);
                }
                if inner.closed {
                    return PopResult::Closed;
                }
                return PopResult::TimedOut;
            }
        }
    }

    /// Close the ring: reject all future pushes and wake blocked pops.
    /// Buffered frames stay available for draining.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        drop(inner);
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of frames currently buffered.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames accepted by `push` (stored or evicting).
    pub fn pushed_count(&self) -> u64 {
        self.pushed.load(Ordering::SeqCst)
    }

    /// Total frames handed to the consumer.
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Total frames evicted under backpressure.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}
