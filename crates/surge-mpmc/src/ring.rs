//! Bounded lock-free MPMC ring buffer.
//!
//! The ring is a fixed power-of-two array of slots indexed by two
//! monotonically increasing 64-bit counters: `head` (next producer
//! reservation) and `tail` (next consumer reservation). A thread that wins
//! the compare-and-swap on its counter owns the slot at `counter & (N-1)`.
//!
//! Each slot carries its own sequence number, published with release
//! ordering after the value is written. A consumer only claims a slot whose
//! sequence matches the value it expects for the current lap, so it can
//! never observe a reserved-but-unwritten cell. Counter arithmetic is
//! wrapping throughout; `head - tail` stays correct across wraparound.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_utils::CachePadded;

use crate::queue::TaskQueue;

/// Ratio reported when neither pushes nor pops occurred in the interval.
const RATIO_IDLE: f64 = 1.0;

/// Sentinel reported when items arrived but none drained.
const RATIO_PRESSURE: f64 = 9999.0;

/// Sleep between spin rounds while waiting for an item.
const WAIT_SLEEP: Duration = Duration::from_micros(10);

/// One cell of the ring.
///
/// `seq` is the publication gate: `pos` while the slot is free for the
/// producer of lap `pos`, `pos + 1` once the value is readable, and
/// `pos + capacity` after the consumer releases it for the next lap.
struct Slot<T> {
    seq: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lock-free multi-producer/multi-consumer FIFO.
///
/// Enqueue and dequeue are non-blocking CAS retry loops; fullness and
/// emptiness are reported through return values. The queue additionally
/// keeps an item-count hint for [`wait_for_item`], a sticky shutdown flag,
/// and cumulative push/pop counters backing [`throughput_ratio`].
///
/// [`wait_for_item`]: BoundedQueue::wait_for_item
/// [`throughput_ratio`]: BoundedQueue::throughput_ratio
pub struct BoundedQueue<T> {
    slots: Box<[Slot<T>]>,
    mask: u64,
    capacity: u64,

    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    /// Wake-up hint for idle waiters. Not authoritative for emptiness:
    /// that is `head == tail`.
    item_count: CachePadded<AtomicU64>,

    shutdown: AtomicBool,

    push_total: AtomicU64,
    pop_total: AtomicU64,
    // Observer snapshots for throughput_ratio; single observer only.
    last_push: AtomicU64,
    last_pop: AtomicU64,
}

unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or is smaller than 2.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "capacity must be at least 2");
        assert!(
            capacity.is_power_of_two(),
            "capacity must be a power of two"
        );

        let mut slots = Vec::with_capacity(capacity);
        for pos in 0..capacity {
            slots.push(Slot {
                seq: AtomicU64::new(pos as u64),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }

        Self {
            slots: slots.into_boxed_slice(),
            mask: capacity as u64 - 1,
            capacity: capacity as u64,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            item_count: CachePadded::new(AtomicU64::new(0)),
            shutdown: AtomicBool::new(false),
            push_total: AtomicU64::new(0),
            pop_total: AtomicU64::new(0),
            last_push: AtomicU64::new(0),
            last_pop: AtomicU64::new(0),
        }
    }

    /// Fixed capacity of the ring.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Best-effort snapshot of the number of queued items.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail) as usize
    }

    /// True when `head == tail`.
    #[inline]
    pub fn is_empty(&self) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        tail == head
    }

    /// True when `head - tail == capacity`.
    #[inline]
    pub fn is_full(&self) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) >= self.capacity
    }

    /// Attempts to enqueue `item`, handing it back if the queue is full at
    /// the instant of the attempt.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(head & self.mask) as usize];
            let seq = slot.seq.load(Ordering::Acquire);
            let lag = seq.wrapping_sub(head) as i64;

            if lag == 0 {
                // Slot is free for this lap; reservation is the
                // linearization point.
                match self.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(item) };
                        slot.seq.store(head.wrapping_add(1), Ordering::Release);
                        self.push_total.fetch_add(1, Ordering::Relaxed);
                        self.item_count.fetch_add(1, Ordering::Release);
                        return Ok(());
                    }
                    Err(observed) => head = observed,
                }
            } else if lag < 0 {
                // Slot still carries the previous lap. Full, unless a
                // consumer is mid-release.
                let tail = self.tail.load(Ordering::Acquire);
                if head.wrapping_sub(tail) >= self.capacity {
                    return Err(item);
                }
                head = self.head.load(Ordering::Relaxed);
            } else {
                // Another producer advanced past this position.
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempts to dequeue one item. `None` when the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[(tail & self.mask) as usize];
            let seq = slot.seq.load(Ordering::Acquire);
            let lag = seq.wrapping_sub(tail.wrapping_add(1)) as i64;

            if lag == 0 {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq
                            .store(tail.wrapping_add(self.capacity), Ordering::Release);
                        self.pop_total.fetch_add(1, Ordering::Relaxed);
                        self.item_count.fetch_sub(1, Ordering::Release);
                        return Some(value);
                    }
                    Err(observed) => tail = observed,
                }
            } else if lag < 0 {
                // Nothing published at this position.
                return None;
            } else {
                // Another consumer advanced past this position.
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeues up to `max` items with a single reservation on `tail`.
    ///
    /// Observes `available = head - tail`, claims `min(available, max)`
    /// positions in one CAS, and moves the items out in index order. A
    /// claimed slot whose producer write is still in flight is spun out;
    /// the publish is release-ordered and imminent.
    pub fn try_pop_batch(&self, out: &mut Vec<T>, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        let mut tail = self.tail.load(Ordering::Relaxed);
        loop {
            let head = self.head.load(Ordering::Acquire);
            let available = head.wrapping_sub(tail);
            if available == 0 {
                return 0;
            }
            let take = available.min(max as u64);
            match self.tail.compare_exchange(
                tail,
                tail.wrapping_add(take),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    for offset in 0..take {
                        let pos = tail.wrapping_add(offset);
                        let slot = &self.slots[(pos & self.mask) as usize];
                        while slot.seq.load(Ordering::Acquire) != pos.wrapping_add(1) {
                            std::hint::spin_loop();
                        }
                        out.push(unsafe { (*slot.value.get()).assume_init_read() });
                        slot.seq
                            .store(pos.wrapping_add(self.capacity), Ordering::Release);
                    }
                    self.pop_total.fetch_add(take, Ordering::Relaxed);
                    self.item_count.fetch_sub(take, Ordering::Release);
                    return take as usize;
                }
                Err(observed) => tail = observed,
            }
        }
    }

    /// Blocks until the item-count hint shows at least one item or
    /// shutdown is observed.
    ///
    /// Spins up to `spin_count` yield iterations, then takes short timed
    /// sleeps. The hint is not authoritative: a subsequent [`try_pop`] may
    /// still lose the item to a racing consumer.
    ///
    /// [`try_pop`]: BoundedQueue::try_pop
    pub fn wait_for_item(&self, spin_count: usize) {
        while self.item_count.load(Ordering::Acquire) == 0 && !self.is_shutdown() {
            for _ in 0..spin_count {
                if self.item_count.load(Ordering::Relaxed) != 0 {
                    break;
                }
                thread::yield_now();
            }
            if self.item_count.load(Ordering::Acquire) == 0 && !self.is_shutdown() {
                thread::sleep(WAIT_SLEEP);
            }
        }
    }

    /// Marks the queue shut down, waking idle waiters. Idempotent; the
    /// flag stays set for the lifetime of the queue.
    pub fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// True once shutdown has been signalled.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Pushes-per-pop ratio since the previous call.
    ///
    /// 1.0 when the interval saw no traffic, [`RATIO_PRESSURE`] when items
    /// arrived without any draining, otherwise the quotient of the deltas.
    /// Single observer: each call advances the snapshot.
    pub fn throughput_ratio(&self) -> f64 {
        let cur_push = self.push_total.load(Ordering::Relaxed);
        let cur_pop = self.pop_total.load(Ordering::Relaxed);
        let delta_push = cur_push.wrapping_sub(self.last_push.swap(cur_push, Ordering::Relaxed));
        let delta_pop = cur_pop.wrapping_sub(self.last_pop.swap(cur_pop, Ordering::Relaxed));
        if delta_push == 0 && delta_pop == 0 {
            return RATIO_IDLE;
        }
        if delta_pop == 0 {
            return RATIO_PRESSURE;
        }
        delta_push as f64 / delta_pop as f64
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        // All threads are gone by now; drain whatever was never consumed.
        while self.try_pop().is_some() {}
    }
}

impl<T: Send> TaskQueue<T> for BoundedQueue<T> {
    fn capacity(&self) -> usize {
        BoundedQueue::capacity(self)
    }

    fn len(&self) -> usize {
        BoundedQueue::len(self)
    }

    fn is_empty(&self) -> bool {
        BoundedQueue::is_empty(self)
    }

    fn try_push(&self, item: T) -> Result<(), T> {
        BoundedQueue::try_push(self, item)
    }

    fn try_pop(&self) -> Option<T> {
        BoundedQueue::try_pop(self)
    }

    fn try_pop_batch(&self, out: &mut Vec<T>, max: usize) -> usize {
        BoundedQueue::try_pop_batch(self, out, max)
    }

    fn wait_for_item(&self, spin_count: usize) {
        BoundedQueue::wait_for_item(self, spin_count)
    }

    fn signal_shutdown(&self) {
        BoundedQueue::signal_shutdown(self)
    }

    fn is_shutdown(&self) -> bool {
        BoundedQueue::is_shutdown(self)
    }

    fn throughput_ratio(&self) -> f64 {
        BoundedQueue::throughput_ratio(self)
    }
}
