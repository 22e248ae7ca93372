//! Bounded lock-free queue used between the dispatcher and node pumps.
//!
//! Backed by crossbeam's array ring. Never blocks; the backpressure policy
//! for listeners is drop-oldest via [`BoundedQueue::push_evicting`].

use crossbeam::queue::ArrayQueue;

pub struct BoundedQueue<T> {
    ring: ArrayQueue<T>,
}

impl<T> BoundedQueue<T> {
    /// Capacity must be > 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be > 0");
        Self {
            ring: ArrayQueue::new(capacity),
        }
    }

    /// Returns false when full.
    pub fn try_push(&self, v: T) -> bool {
        self.ring.push(v).is_ok()
    }

    /// Returns `None` when empty.
    pub fn try_pop(&self) -> Option<T> {
        self.ring.pop()
    }

    /// Discard the oldest element. Returns false when empty.
    pub fn drop_one(&self) -> bool {
        self.ring.pop().is_some()
    }

    /// Push, evicting the oldest element when full. Returns the evicted
    /// element so callers can count drops.
    pub fn push_evicting(&self, v: T) -> Option<T> {
        self.ring.force_push(v)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}
