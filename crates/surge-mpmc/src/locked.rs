//! Mutex-guarded unbounded queue satisfying the same pool contract.
//!
//! Slower than [`BoundedQueue`] under contention but never rejects a push,
//! which suits workloads where producer backpressure is handled elsewhere.
//!
//! [`BoundedQueue`]: crate::ring::BoundedQueue

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::queue::TaskQueue;

const RATIO_IDLE: f64 = 1.0;
const RATIO_PRESSURE: f64 = 9999.0;
const WAIT_SLEEP: Duration = Duration::from_micros(10);

struct Inner<T> {
    items: VecDeque<T>,
    push_total: u64,
    pop_total: u64,
    last_push: u64,
    last_pop: u64,
}

/// Unbounded FIFO behind a single mutex.
///
/// `capacity()` reports 0 (no fixed limit) and `try_push` never rejects.
/// The length hint is kept in an atomic so idle waiters poll it without
/// touching the lock.
pub struct LockedQueue<T> {
    inner: Mutex<Inner<T>>,
    len_hint: AtomicU64,
    shutdown: AtomicBool,
}

impl<T> LockedQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                push_total: 0,
                pop_total: 0,
                last_push: 0,
                last_pop: 0,
            }),
            len_hint: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Enqueues `item`. Never rejects.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock();
        inner.items.push_back(item);
        inner.push_total += 1;
        self.len_hint.fetch_add(1, Ordering::Release);
    }

    /// Dequeues the oldest item, or `None` when empty.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let item = inner.items.pop_front()?;
        inner.pop_total += 1;
        self.len_hint.fetch_sub(1, Ordering::Release);
        Some(item)
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.len_hint.load(Ordering::Acquire) as usize
    }

    /// True when no items are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for LockedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> TaskQueue<T> for LockedQueue<T> {
    fn capacity(&self) -> usize {
        0
    }

    fn len(&self) -> usize {
        LockedQueue::len(self)
    }

    fn try_push(&self, item: T) -> Result<(), T> {
        self.push(item);
        Ok(())
    }

    fn try_pop(&self) -> Option<T> {
        self.pop()
    }

    fn wait_for_item(&self, spin_count: usize) {
        while self.len_hint.load(Ordering::Acquire) == 0 && !self.is_shutdown() {
            for _ in 0..spin_count {
                if self.len_hint.load(Ordering::Relaxed) != 0 {
                    break;
                }
                thread::yield_now();
            }
            if self.len_hint.load(Ordering::Acquire) == 0 && !self.is_shutdown() {
                thread::sleep(WAIT_SLEEP);
            }
        }
    }

    fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn throughput_ratio(&self) -> f64 {
        let mut inner = self.inner.lock();
        let delta_push = inner.push_total - inner.last_push;
        let delta_pop = inner.pop_total - inner.last_pop;
        inner.last_push = inner.push_total;
        inner.last_pop = inner.pop_total;
        if delta_push == 0 && delta_pop == 0 {
            return RATIO_IDLE;
        }
        if delta_pop == 0 {
            return RATIO_PRESSURE;
        }
        delta_push as f64 / delta_pop as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_and_unbounded() {
        let queue = LockedQueue::new();
        for i in 0..1000 {
            queue.push(i);
        }
        assert_eq!(TaskQueue::<i32>::capacity(&queue), 0);
        assert_eq!(queue.len(), 1000);
        for i in 0..1000 {
            assert_eq!(queue.pop(), Some(i));
        }
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn ratio_conventions_match_the_ring() {
        let queue = LockedQueue::new();
        assert_eq!(queue.throughput_ratio(), 1.0);

        queue.push(1);
        assert_eq!(queue.throughput_ratio(), 9999.0);

        queue.pop().unwrap();
        queue.push(2);
        queue.push(3);
        queue.pop().unwrap();
        let ratio = queue.throughput_ratio();
        assert!((ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn shutdown_is_sticky() {
        let queue = LockedQueue::<u32>::new();
        assert!(!queue.is_shutdown());
        queue.signal_shutdown();
        queue.signal_shutdown();
        assert!(queue.is_shutdown());
    }
}
