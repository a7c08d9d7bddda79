//! Pool configuration and scenario presets.

use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Default throughput ratio above which the pool considers spawning.
const DEFAULT_SPAWN_THRESHOLD: f64 = 1.2;

/// Default throughput ratio below which the pool considers shrinking.
const DEFAULT_SHRINK_THRESHOLD: f64 = 0.8;

/// Default cadence between monitor samples.
const DEFAULT_MONITOR_INTERVAL_MS: u64 = 200;

/// Default yield iterations inside `wait_for_item` before timed sleeps.
const DEFAULT_SPIN_COUNT: usize = 100;

/// Default consecutive samples required before a scaling action fires.
const DEFAULT_HYSTERESIS: u32 = 2;

/// Default queue depth at which a batching worker prefers a batch dequeue.
const DEFAULT_BATCH_MIN_SIZE: usize = 10;

/// Default maximum items moved by one batch dequeue.
const DEFAULT_BATCH_MAX_COUNT: usize = 200;

/// Default elapsed time after which a batching worker batches regardless
/// of queue depth.
const DEFAULT_BATCH_TIMEOUT_MS: u64 = 3000;

/// Number of worker threads the OS reports, floored at 1.
pub fn hardware_threads() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Tuning knobs for a [`WorkerPool`].
///
/// Construction clamps the thread counts into a consistent shape
/// (`1 <= min <= reserved <= max`); the one inconsistency clamping cannot
/// repair, `spawn_threshold <= shrink_threshold`, is a construction error.
///
/// [`WorkerPool`]: crate::pool::WorkerPool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker records spawned at `start()`.
    pub reserved_threads: usize,
    /// Workers marked active at `start()`; the floor while running.
    pub min_threads: usize,
    /// Hard ceiling on worker records and active workers.
    pub max_threads: usize,
    /// Ratio above which a spawn streak accumulates.
    pub spawn_threshold: f64,
    /// Ratio below which a shrink streak accumulates.
    pub shrink_threshold: f64,
    /// Sleep between monitor samples, in milliseconds.
    pub monitor_interval_ms: u64,
    /// Yield iterations workers spin in `wait_for_item`.
    pub spin_count: usize,
    /// Consecutive above-threshold samples required to scale up.
    pub spawn_hysteresis: u32,
    /// Consecutive below-threshold samples required to scale down.
    pub shrink_hysteresis: u32,
    /// Enables batch dequeue in workers and proportional scaling deltas
    /// in the monitor.
    pub batching: bool,
    /// Divisor turning threshold deviation into a scaling delta when
    /// batching is enabled.
    pub batch_scaling_factor: f64,
    /// Queue depth at which a batching worker prefers a batch dequeue.
    pub batch_min_size: usize,
    /// Maximum items moved by one batch dequeue.
    pub batch_max_count: usize,
    /// Elapsed time after which a batching worker batches regardless of
    /// queue depth, in milliseconds.
    pub batch_timeout_ms: u64,
    /// Lets the monitor stretch its cadence while the ratio is stable and
    /// tighten it while the ratio moves.
    pub adaptive_interval: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let hw = hardware_threads();
        Self {
            reserved_threads: (hw / 2).max(1),
            min_threads: 1,
            max_threads: hw.max(1),
            spawn_threshold: DEFAULT_SPAWN_THRESHOLD,
            shrink_threshold: DEFAULT_SHRINK_THRESHOLD,
            monitor_interval_ms: DEFAULT_MONITOR_INTERVAL_MS,
            spin_count: DEFAULT_SPIN_COUNT,
            spawn_hysteresis: DEFAULT_HYSTERESIS,
            shrink_hysteresis: DEFAULT_HYSTERESIS,
            batching: false,
            batch_scaling_factor: 1.0,
            batch_min_size: DEFAULT_BATCH_MIN_SIZE,
            batch_max_count: DEFAULT_BATCH_MAX_COUNT,
            batch_timeout_ms: DEFAULT_BATCH_TIMEOUT_MS,
            adaptive_interval: false,
        }
    }
}

impl PoolConfig {
    /// Preset for bulk workloads: a single worker until pressure builds,
    /// then aggressive proportional scale-up with batch dequeues.
    pub fn batch_oriented() -> Self {
        Self {
            reserved_threads: 1,
            min_threads: 1,
            max_threads: hardware_threads(),
            spawn_threshold: 1.8,
            shrink_threshold: 0.5,
            monitor_interval_ms: 500,
            spawn_hysteresis: 3,
            shrink_hysteresis: 2,
            batching: true,
            batch_scaling_factor: 0.5,
            batch_min_size: 10,
            batch_max_count: 200,
            batch_timeout_ms: 3000,
            ..Self::default()
        }
    }

    /// Preset for latency-sensitive workloads: a wide standing pool and a
    /// fast monitor that reacts to the smallest sustained imbalance.
    pub fn realtime() -> Self {
        let hw = hardware_threads();
        Self {
            reserved_threads: (hw / 2).max(2),
            min_threads: 2,
            max_threads: hw,
            spawn_threshold: 1.05,
            shrink_threshold: 0.9,
            monitor_interval_ms: 100,
            spawn_hysteresis: 1,
            shrink_hysteresis: 1,
            batching: false,
            ..Self::default()
        }
    }

    /// Monitor cadence as a [`Duration`].
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Batch timeout as a [`Duration`].
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Clamps the thread counts into a consistent shape and rejects
    /// threshold inversions.
    pub(crate) fn validated(mut self) -> PoolResult<Self> {
        if self.min_threads < 1 {
            self.min_threads = 1;
        }
        if self.reserved_threads < self.min_threads {
            self.reserved_threads = self.min_threads;
        }
        if self.max_threads < self.reserved_threads {
            self.max_threads = self.reserved_threads;
        }
        if self.spawn_threshold <= self.shrink_threshold {
            return Err(PoolError::InvalidConfig(format!(
                "spawn_threshold ({}) must be greater than shrink_threshold ({})",
                self.spawn_threshold, self.shrink_threshold
            )));
        }
        if self.batching && self.batch_scaling_factor <= 0.0 {
            return Err(PoolError::InvalidConfig(format!(
                "batch_scaling_factor ({}) must be positive when batching is enabled",
                self.batch_scaling_factor
            )));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_thread_counts_upward() {
        let config = PoolConfig {
            min_threads: 0,
            reserved_threads: 0,
            max_threads: 0,
            ..PoolConfig::default()
        }
        .validated()
        .unwrap();

        assert_eq!(config.min_threads, 1);
        assert_eq!(config.reserved_threads, 1);
        assert_eq!(config.max_threads, 1);
    }

    #[test]
    fn preserves_reserved_above_min() {
        let config = PoolConfig {
            min_threads: 2,
            reserved_threads: 6,
            max_threads: 4,
            ..PoolConfig::default()
        }
        .validated()
        .unwrap();

        assert_eq!(config.reserved_threads, 6);
        assert_eq!(config.max_threads, 6);
    }

    #[test]
    fn rejects_threshold_inversion() {
        let result = PoolConfig {
            spawn_threshold: 0.5,
            shrink_threshold: 0.8,
            ..PoolConfig::default()
        }
        .validated();

        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_non_positive_scaling_factor() {
        let result = PoolConfig {
            batching: true,
            batch_scaling_factor: 0.0,
            ..PoolConfig::default()
        }
        .validated();

        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
    }

    #[test]
    fn batch_oriented_preset() {
        let config = PoolConfig::batch_oriented();
        assert_eq!(config.reserved_threads, 1);
        assert_eq!(config.min_threads, 1);
        assert_eq!(config.max_threads, hardware_threads());
        assert!(config.batching);
        assert_eq!(config.spawn_hysteresis, 3);
        assert_eq!(config.shrink_hysteresis, 2);
        assert_eq!(config.batch_max_count, 200);
        assert!(config.validated().is_ok());
    }

    #[test]
    fn realtime_preset() {
        let config = PoolConfig::realtime();
        assert!(config.reserved_threads >= 2);
        assert_eq!(config.min_threads, 2);
        assert!(!config.batching);
        assert_eq!(config.spawn_hysteresis, 1);
        assert_eq!(config.monitor_interval_ms, 100);
        assert!(config.validated().is_ok());
    }
}
