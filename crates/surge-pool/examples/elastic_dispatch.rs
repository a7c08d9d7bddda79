//! Drives a batch-oriented pool with bursty producers and prints how the
//! active worker count follows the load.
//!
//! Run with `RUST_LOG=debug` to see the monitor's scaling decisions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use surge_pool::{BoundedQueue, PoolConfig, WorkerPool};
use tracing_subscriber::EnvFilter;

fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    let queue = Arc::new(BoundedQueue::new(1024));
    let processed = Arc::new(AtomicUsize::new(0));

    let handler_processed = Arc::clone(&processed);
    let pool = WorkerPool::new(
        Arc::clone(&queue),
        PoolConfig {
            monitor_interval_ms: 50,
            adaptive_interval: true,
            ..PoolConfig::batch_oriented()
        },
        move |item: &mut u64| {
            // Pretend each item costs a couple of milliseconds.
            thread::sleep(Duration::from_millis(2));
            let _ = *item;
            handler_processed.fetch_add(1, Ordering::Relaxed);
        },
    )
    .expect("pool configuration is valid");
    pool.start().expect("pool start");

    let producers: Vec<_> = (0..2u64)
        .map(|producer_id| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for burst in 0..5u64 {
                    for i in 0..200u64 {
                        let mut item = producer_id * 1_000_000 + burst * 1_000 + i;
                        while let Err(rejected) = queue.try_push(item) {
                            item = rejected;
                            thread::yield_now();
                        }
                    }
                    thread::sleep(Duration::from_millis(300));
                }
            })
        })
        .collect();

    for tick in 0..20 {
        thread::sleep(Duration::from_millis(200));
        println!(
            "t={:>4}ms queued={:>4} active={} processed={}",
            tick * 200,
            queue.len(),
            pool.active_count(),
            processed.load(Ordering::Relaxed),
        );
    }

    for producer in producers {
        producer.join().expect("producer thread");
    }
    pool.wait();
    pool.stop();

    let metrics = pool.metrics();
    println!(
        "done: processed={} batches={} scale_ups={} scale_downs={}",
        metrics.items_processed,
        metrics.batches_dequeued,
        metrics.scale_up_events,
        metrics.scale_down_events,
    );
}
