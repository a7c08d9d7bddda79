//! The elastic worker pool.
//!
//! Three cooperating actors share one queue: worker threads drain it, a
//! monitor thread samples its throughput ratio and resizes the active
//! worker set, and the owning thread drives `start`/`stop`. The worker
//! set, hysteresis streaks and monitor handle live behind a single pool
//! lock that only the monitor and `start`/`stop` take; workers share
//! nothing with the monitor beyond the per-worker atomic flags.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use surge_mpmc::TaskQueue;

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};
use crate::metrics::{PoolMetrics, PoolMetricsSnapshot};

/// Floor of the adaptive monitor cadence.
const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(10);

/// Ceiling of the adaptive monitor cadence.
const MAX_MONITOR_INTERVAL: Duration = Duration::from_millis(1000);

/// Consecutive stable samples before the adaptive cadence doubles.
const MONITOR_STABLE_SAMPLES: u32 = 5;

/// Ratio movement below this counts as stable.
const MONITOR_STABLE_BAND: f64 = 0.1;

/// Backstop timeout for idle parking, so a missed notify cannot strand a
/// worker.
const IDLE_PARK_TIMEOUT: Duration = Duration::from_millis(50);

/// Poll cadence of [`WorkerPool::wait`].
const DRAIN_POLL: Duration = Duration::from_millis(1);

/// Control flags shared between a worker thread and the pool.
///
/// A deactivated worker keeps its record and flags; only `active` flips.
struct WorkerFlags {
    exit_requested: AtomicBool,
    active: AtomicBool,
}

/// Owned record of one worker thread.
///
/// Created in place and never moved between threads after spawn; the
/// worker thread holds its own `Arc` of the flags, so the record vector
/// may reallocate freely. Taking the record down joins the thread.
struct WorkerHandle {
    thread: Option<JoinHandle<()>>,
    flags: Arc<WorkerFlags>,
}

impl WorkerHandle {
    fn request_exit(&self) {
        self.flags.exit_requested.store(true, Ordering::Release);
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// State behind the single pool-level lock.
struct PoolState {
    workers: Vec<WorkerHandle>,
    monitor: Option<JoinHandle<()>>,
    spawn_streak: u32,
    shrink_streak: u32,
    next_worker_id: usize,
}

/// Everything shared between the pool handle, its workers and the monitor.
struct PoolCore<Q, T>
where
    Q: TaskQueue<T> + 'static,
    T: Send + 'static,
{
    queue: Arc<Q>,
    handler: Arc<dyn Fn(&mut T) + Send + Sync>,
    config: PoolConfig,

    running: AtomicBool,
    /// Mutated only under the pool lock; read lock-free by observers.
    active_threads: AtomicUsize,
    /// Handler invocations currently on a worker's stack.
    in_flight: AtomicUsize,

    idle_lock: Mutex<()>,
    idle_cv: Condvar,

    metrics: PoolMetrics,
    state: Mutex<PoolState>,
}

impl<Q, T> PoolCore<Q, T>
where
    Q: TaskQueue<T> + 'static,
    T: Send + 'static,
{
    fn spawn_worker(core: &Arc<Self>, worker_id: usize) -> PoolResult<WorkerHandle> {
        let flags = Arc::new(WorkerFlags {
            exit_requested: AtomicBool::new(false),
            active: AtomicBool::new(false),
        });
        let thread_flags = Arc::clone(&flags);
        let thread_core = Arc::clone(core);
        let thread = thread::Builder::new()
            .name(format!("surge-worker-{worker_id}"))
            .spawn(move || Self::worker_loop(&thread_core, &thread_flags, worker_id))
            .map_err(PoolError::Spawn)?;
        core.metrics.incr_workers_spawned();
        Ok(WorkerHandle {
            thread: Some(thread),
            flags,
        })
    }

    fn worker_loop(core: &Arc<Self>, flags: &WorkerFlags, worker_id: usize) {
        let config = &core.config;
        let mut batch: Vec<T> = Vec::new();
        if config.batching {
            batch.reserve(config.batch_max_count);
        }
        let batch_timeout = config.batch_timeout();
        let mut last_batch = Instant::now();

        loop {
            if flags.exit_requested.load(Ordering::Acquire) {
                break;
            }
            if !flags.active.load(Ordering::Acquire) {
                let mut idle = core.idle_lock.lock();
                while !flags.active.load(Ordering::Acquire)
                    && !flags.exit_requested.load(Ordering::Acquire)
                    && core.running.load(Ordering::Acquire)
                {
                    let _ = core.idle_cv.wait_for(&mut idle, IDLE_PARK_TIMEOUT);
                }
                continue;
            }

            core.queue.wait_for_item(config.spin_count);
            if flags.exit_requested.load(Ordering::Acquire) || core.queue.is_shutdown() {
                break;
            }

            // The in-flight count brackets the dequeue as well as the
            // handler, so `wait` cannot observe an empty queue while a
            // claimed item has not been processed yet.
            core.in_flight.fetch_add(1, Ordering::AcqRel);
            if config.batching
                && (core.queue.len() >= config.batch_min_size
                    || last_batch.elapsed() >= batch_timeout)
            {
                let popped = core.queue.try_pop_batch(&mut batch, config.batch_max_count);
                if popped > 0 {
                    core.metrics.incr_batches_dequeued();
                }
                for item in batch.drain(..) {
                    core.run_handler(item, worker_id);
                }
                last_batch = Instant::now();
            } else if let Some(item) = core.queue.try_pop() {
                core.run_handler(item, worker_id);
            }
            core.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
        debug!(worker_id, "worker exited");
    }

    /// Runs the handler on one item, isolating any panic it raises.
    fn run_handler(&self, mut item: T, worker_id: usize) {
        let handler = &self.handler;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(&mut item)));
        match outcome {
            Ok(()) => self.metrics.incr_items_processed(),
            Err(_) => {
                self.metrics.incr_handler_failures();
                warn!(worker_id, "task handler panicked; item discarded");
            }
        }
    }

    fn monitor_loop(core: &Arc<Self>) {
        let config = &core.config;
        let mut interval = config.monitor_interval();
        let mut last_ratio: Option<f64> = None;
        let mut stable_samples = 0u32;

        while core.running.load(Ordering::Acquire) {
            thread::sleep(interval);
            if !core.running.load(Ordering::Acquire) {
                break;
            }

            let ratio = core.queue.throughput_ratio();
            let mut scaled = false;
            {
                let mut state = core.state.lock();
                if !core.running.load(Ordering::Acquire) {
                    break;
                }

                let active = core.active_threads.load(Ordering::Relaxed);
                if ratio > config.spawn_threshold && active < config.max_threads {
                    state.spawn_streak += 1;
                    if state.spawn_streak >= config.spawn_hysteresis {
                        let delta = scale_delta(
                            config.batching,
                            ratio - config.spawn_threshold,
                            config.batch_scaling_factor,
                        );
                        Self::activate_locked(core, &mut state, delta);
                        core.metrics.incr_scale_up();
                        debug!(
                            ratio,
                            delta,
                            active = core.active_threads.load(Ordering::Relaxed),
                            "scaled up"
                        );
                        state.spawn_streak = 0;
                        scaled = true;
                    }
                } else {
                    state.spawn_streak = 0;
                }

                let active = core.active_threads.load(Ordering::Relaxed);
                if ratio < config.shrink_threshold && active > config.min_threads {
                    state.shrink_streak += 1;
                    if state.shrink_streak >= config.shrink_hysteresis {
                        let delta = scale_delta(
                            config.batching,
                            config.shrink_threshold - ratio,
                            config.batch_scaling_factor,
                        );
                        core.deactivate_locked(&mut state, delta);
                        core.metrics.incr_scale_down();
                        debug!(
                            ratio,
                            delta,
                            active = core.active_threads.load(Ordering::Relaxed),
                            "scaled down"
                        );
                        state.shrink_streak = 0;
                        scaled = true;
                    }
                } else {
                    state.shrink_streak = 0;
                }
            }

            if config.adaptive_interval {
                interval = next_interval(
                    interval,
                    ratio,
                    &mut last_ratio,
                    &mut stable_samples,
                    scaled,
                );
            }
        }
    }

    /// Activates up to `count` workers, spawning records as needed.
    /// Caller holds the pool lock.
    fn activate_locked(core: &Arc<Self>, state: &mut PoolState, count: usize) {
        for _ in 0..count {
            let active = core.active_threads.load(Ordering::Relaxed);
            if active >= core.config.max_threads {
                break;
            }
            if state.workers.len() <= active {
                let worker_id = state.next_worker_id;
                match Self::spawn_worker(core, worker_id) {
                    Ok(handle) => {
                        state.next_worker_id += 1;
                        state.workers.push(handle);
                    }
                    Err(err) => {
                        error!(error = %err, "worker spawn failed during scale-up");
                        break;
                    }
                }
            }
            match state
                .workers
                .iter()
                .find(|worker| !worker.flags.active.load(Ordering::Acquire))
            {
                Some(worker) => {
                    worker.flags.active.store(true, Ordering::Release);
                    core.active_threads.fetch_add(1, Ordering::AcqRel);
                }
                None => break,
            }
        }
        core.idle_cv.notify_all();
    }

    /// Deactivates up to `count` workers, never dropping below the
    /// configured minimum. Deactivated workers park; they are not joined.
    /// Caller holds the pool lock.
    fn deactivate_locked(&self, state: &mut PoolState, count: usize) {
        for _ in 0..count {
            if self.active_threads.load(Ordering::Relaxed) <= self.config.min_threads {
                break;
            }
            match state
                .workers
                .iter()
                .find(|worker| worker.flags.active.load(Ordering::Acquire))
            {
                Some(worker) => {
                    worker.flags.active.store(false, Ordering::Release);
                    self.active_threads.fetch_sub(1, Ordering::AcqRel);
                }
                None => break,
            }
        }
    }

    /// Unwinds a partially started pool: wakes and joins every spawned
    /// worker. Startup failure is fatal for the pool, so the queue's
    /// sticky shutdown flag is raised to unblock workers already waiting
    /// on it.
    fn abort_start(core: &Arc<Self>, state: &mut PoolState) {
        for worker in &state.workers {
            worker.request_exit();
        }
        core.running.store(false, Ordering::Release);
        core.queue.signal_shutdown();
        core.idle_cv.notify_all();
        state.workers.clear();
        core.active_threads.store(0, Ordering::Release);
    }
}

/// Number of workers a scaling action moves.
fn scale_delta(batching: bool, deviation: f64, factor: f64) -> usize {
    if batching {
        ((deviation / factor) as usize).max(1)
    } else {
        1
    }
}

/// Adapts the monitor cadence: stable ratios stretch it, moving ratios
/// and scaling actions tighten it.
fn next_interval(
    current: Duration,
    ratio: f64,
    last_ratio: &mut Option<f64>,
    stable_samples: &mut u32,
    scaled: bool,
) -> Duration {
    let previous = last_ratio.replace(ratio);
    if scaled {
        *stable_samples = 0;
        return (current / 2).max(MIN_MONITOR_INTERVAL);
    }
    match previous {
        Some(previous) if (ratio - previous).abs() < MONITOR_STABLE_BAND => {
            *stable_samples += 1;
            if *stable_samples >= MONITOR_STABLE_SAMPLES {
                *stable_samples = 0;
                (current * 2).min(MAX_MONITOR_INTERVAL)
            } else {
                current
            }
        }
        Some(_) => {
            *stable_samples = 0;
            (current / 2).max(MIN_MONITOR_INTERVAL)
        }
        None => current,
    }
}

/// A pool of worker threads bound to one [`TaskQueue`].
///
/// Inert at construction. [`start`] spawns `reserved_threads` workers,
/// marks the first `min_threads` active and launches the monitor;
/// [`stop`] (also run on drop) requests exit everywhere, signals queue
/// shutdown and joins every thread. Because queue shutdown is sticky,
/// restarting a stopped pool against the same queue is not supported.
///
/// [`start`]: WorkerPool::start
/// [`stop`]: WorkerPool::stop
pub struct WorkerPool<Q, T>
where
    Q: TaskQueue<T> + 'static,
    T: Send + 'static,
{
    core: Arc<PoolCore<Q, T>>,
}

impl<Q, T> WorkerPool<Q, T>
where
    Q: TaskQueue<T> + 'static,
    T: Send + 'static,
{
    /// Builds an inert pool over `queue`.
    ///
    /// `handler` runs once per dequeued item on whichever worker claimed
    /// it; it must not assume ordering across workers. Panics it raises
    /// are caught, counted and discarded.
    pub fn new<F>(queue: Arc<Q>, config: PoolConfig, handler: F) -> PoolResult<Self>
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        let config = config.validated()?;
        Ok(Self {
            core: Arc::new(PoolCore {
                queue,
                handler: Arc::new(handler),
                config,
                running: AtomicBool::new(false),
                active_threads: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                idle_lock: Mutex::new(()),
                idle_cv: Condvar::new(),
                metrics: PoolMetrics::default(),
                state: Mutex::new(PoolState {
                    workers: Vec::new(),
                    monitor: None,
                    spawn_streak: 0,
                    shrink_streak: 0,
                    next_worker_id: 0,
                }),
            }),
        })
    }

    /// Pool configured with the batch-oriented preset.
    pub fn batch_oriented<F>(queue: Arc<Q>, handler: F) -> PoolResult<Self>
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        Self::new(queue, PoolConfig::batch_oriented(), handler)
    }

    /// Pool configured with the realtime preset.
    pub fn realtime<F>(queue: Arc<Q>, handler: F) -> PoolResult<Self>
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        Self::new(queue, PoolConfig::realtime(), handler)
    }

    /// Starts the pool. Idempotent: a second call while running returns
    /// without effect. A thread-spawn failure rolls the start back and is
    /// returned.
    pub fn start(&self) -> PoolResult<()> {
        let core = &self.core;
        if core
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let mut state = core.state.lock();
        for _ in 0..core.config.reserved_threads {
            let worker_id = state.next_worker_id;
            match PoolCore::spawn_worker(core, worker_id) {
                Ok(handle) => {
                    state.next_worker_id += 1;
                    state.workers.push(handle);
                }
                Err(err) => {
                    PoolCore::abort_start(core, &mut state);
                    return Err(err);
                }
            }
        }

        for worker in state.workers.iter().take(core.config.min_threads) {
            worker.flags.active.store(true, Ordering::Release);
        }
        core.active_threads
            .store(core.config.min_threads, Ordering::Release);
        core.idle_cv.notify_all();

        let monitor_core = Arc::clone(core);
        match thread::Builder::new()
            .name("surge-monitor".into())
            .spawn(move || PoolCore::monitor_loop(&monitor_core))
        {
            Ok(handle) => state.monitor = Some(handle),
            Err(err) => {
                PoolCore::abort_start(core, &mut state);
                return Err(PoolError::Spawn(err));
            }
        }

        debug!(
            reserved = core.config.reserved_threads,
            min = core.config.min_threads,
            max = core.config.max_threads,
            "worker pool started"
        );
        Ok(())
    }

    /// Stops the pool. Idempotent. Requests exit from every worker,
    /// signals queue shutdown, wakes idle workers, then joins the monitor
    /// and every worker.
    pub fn stop(&self) {
        let core = &self.core;
        if core
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        {
            let state = core.state.lock();
            for worker in &state.workers {
                worker.request_exit();
            }
            core.queue.signal_shutdown();
            core.idle_cv.notify_all();
        }

        let monitor = core.state.lock().monitor.take();
        if let Some(handle) = monitor {
            let _ = handle.join();
        }

        let workers = std::mem::take(&mut core.state.lock().workers);
        for mut worker in workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }

        core.active_threads.store(0, Ordering::Release);
        let mut state = core.state.lock();
        state.spawn_streak = 0;
        state.shrink_streak = 0;
        debug!("worker pool stopped");
    }

    /// Blocks until the queue is empty and no handler invocation is in
    /// flight. Returns immediately if the pool is not running.
    pub fn wait(&self) {
        let core = &self.core;
        while core.running.load(Ordering::Acquire)
            && !(core.queue.is_empty() && core.in_flight.load(Ordering::Acquire) == 0)
        {
            thread::sleep(DRAIN_POLL);
        }
    }

    /// Number of workers currently marked active.
    pub fn active_count(&self) -> usize {
        self.core.active_threads.load(Ordering::Acquire)
    }

    /// Total worker records owned by the pool, active or parked.
    pub fn total_threads(&self) -> usize {
        self.core.state.lock().workers.len()
    }

    /// True between a successful `start()` and the matching `stop()`.
    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    /// Copy of the pool counters.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// The queue this pool drains.
    pub fn queue(&self) -> &Arc<Q> {
        &self.core.queue
    }
}

impl<Q, T> Drop for WorkerPool<Q, T>
where
    Q: TaskQueue<T> + 'static,
    T: Send + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_delta_is_one_without_batching() {
        assert_eq!(scale_delta(false, 10.0, 0.5), 1);
    }

    #[test]
    fn scale_delta_is_proportional_with_batching() {
        assert_eq!(scale_delta(true, 0.1, 0.5), 1);
        assert_eq!(scale_delta(true, 1.0, 0.5), 2);
        assert_eq!(scale_delta(true, 2.5, 0.5), 5);
    }

    #[test]
    fn adaptive_interval_doubles_when_stable() {
        let mut last_ratio = None;
        let mut stable = 0;
        let mut interval = Duration::from_millis(100);

        // First sample only seeds the history.
        interval = next_interval(interval, 1.0, &mut last_ratio, &mut stable, false);
        assert_eq!(interval, Duration::from_millis(100));

        for _ in 0..MONITOR_STABLE_SAMPLES {
            interval = next_interval(interval, 1.0, &mut last_ratio, &mut stable, false);
        }
        assert_eq!(interval, Duration::from_millis(200));
    }

    #[test]
    fn adaptive_interval_halves_on_movement_and_scaling() {
        let mut last_ratio = Some(1.0);
        let mut stable = 3;
        let interval = next_interval(
            Duration::from_millis(400),
            2.0,
            &mut last_ratio,
            &mut stable,
            false,
        );
        assert_eq!(interval, Duration::from_millis(200));
        assert_eq!(stable, 0);

        let interval = next_interval(
            Duration::from_millis(20),
            2.0,
            &mut last_ratio,
            &mut stable,
            true,
        );
        assert_eq!(interval, MIN_MONITOR_INTERVAL);
    }

    #[test]
    fn adaptive_interval_respects_bounds() {
        let mut last_ratio = Some(1.0);
        let mut stable = MONITOR_STABLE_SAMPLES - 1;
        let interval = next_interval(
            MAX_MONITOR_INTERVAL,
            1.0,
            &mut last_ratio,
            &mut stable,
            false,
        );
        assert_eq!(interval, MAX_MONITOR_INTERVAL);

        let mut stable = 0;
        let interval = next_interval(
            MIN_MONITOR_INTERVAL,
            5.0,
            &mut last_ratio,
            &mut stable,
            false,
        );
        assert_eq!(interval, MIN_MONITOR_INTERVAL);
    }
}
