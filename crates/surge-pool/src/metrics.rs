//! Observational counters for a running pool.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`PoolMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    pub items_processed: u64,
    pub handler_failures: u64,
    pub batches_dequeued: u64,
    pub scale_up_events: u64,
    pub scale_down_events: u64,
    pub workers_spawned: u64,
}

/// Cumulative pool counters, updated with relaxed atomics on the hot path.
///
/// Purely observational: scaling decisions are driven by the queue's
/// throughput ratio, never by these values.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    items_processed: AtomicU64,
    handler_failures: AtomicU64,
    batches_dequeued: AtomicU64,
    scale_up_events: AtomicU64,
    scale_down_events: AtomicU64,
    workers_spawned: AtomicU64,
}

impl PoolMetrics {
    #[inline]
    pub fn incr_items_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_handler_failures(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_batches_dequeued(&self) {
        self.batches_dequeued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_scale_up(&self) {
        self.scale_up_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_scale_down(&self) {
        self.scale_down_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn incr_workers_spawned(&self) {
        self.workers_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            items_processed: self.items_processed.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            batches_dequeued: self.batches_dequeued.load(Ordering::Relaxed),
            scale_up_events: self.scale_up_events.load(Ordering::Relaxed),
            scale_down_events: self.scale_down_events.load(Ordering::Relaxed),
            workers_spawned: self.workers_spawned.load(Ordering::Relaxed),
        }
    }
}
