//! Multi-threaded producer/consumer tests for the bounded ring.
//!
//! These drive real OS threads and check the no-loss / no-duplication
//! properties: for any mix of producers and consumers, the multiset of
//! dequeued items equals the multiset of successfully enqueued items.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use surge_mpmc::BoundedQueue;

/// Pushes `item`, yielding until the queue has room.
fn push_retrying(queue: &BoundedQueue<u64>, item: u64) {
    let mut pending = item;
    loop {
        match queue.try_push(pending) {
            Ok(()) => return,
            Err(rejected) => {
                pending = rejected;
                thread::yield_now();
            }
        }
    }
}

#[test]
fn single_producer_single_consumer_1000_items() {
    let queue = Arc::new(BoundedQueue::new(1024));

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0..1000u64 {
                push_retrying(&queue, i);
            }
        })
    };

    let mut collected = Vec::with_capacity(1000);
    while collected.len() < 1000 {
        match queue.try_pop() {
            Some(item) => collected.push(item),
            None => thread::yield_now(),
        }
    }
    producer.join().unwrap();

    collected.sort_unstable();
    let expected: Vec<u64> = (0..1000).collect();
    assert_eq!(collected, expected);
    assert_eq!(queue.len(), 0);
    assert!(queue.is_empty());
}

#[test]
fn four_producers_single_consumer() {
    let queue = Arc::new(BoundedQueue::new(1024));
    let items_per_producer = 500u64;

    let producers: Vec<_> = (0..4u64)
        .map(|producer_id| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..items_per_producer {
                    push_retrying(&queue, producer_id * 10_000 + i);
                }
            })
        })
        .collect();

    let total = 4 * items_per_producer as usize;
    let mut collected = Vec::with_capacity(total);
    while collected.len() < total {
        match queue.try_pop() {
            Some(item) => collected.push(item),
            None => thread::yield_now(),
        }
    }
    for producer in producers {
        producer.join().unwrap();
    }

    collected.sort_unstable();
    let mut expected: Vec<u64> = (0..4u64)
        .flat_map(|p| (0..items_per_producer).map(move |i| p * 10_000 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(collected, expected);
    assert!(queue.is_empty());
}

#[test]
fn three_producers_two_consumers() {
    let queue = Arc::new(BoundedQueue::new(512));
    let items_per_producer = 300u64;
    let total = 3 * items_per_producer as usize;
    let popped = Arc::new(AtomicUsize::new(0));
    let producers_done = Arc::new(AtomicBool::new(false));

    let producers: Vec<_> = (0..3u64)
        .map(|producer_id| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..items_per_producer {
                    push_retrying(&queue, producer_id * 10_000 + i);
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..2)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let popped = Arc::clone(&popped);
            let producers_done = Arc::clone(&producers_done);
            thread::spawn(move || {
                let mut local = Vec::new();
                loop {
                    match queue.try_pop() {
                        Some(item) => {
                            local.push(item);
                            popped.fetch_add(1, Ordering::AcqRel);
                        }
                        None => {
                            if popped.load(Ordering::Acquire) >= total
                                || (producers_done.load(Ordering::Acquire) && queue.is_empty())
                            {
                                break;
                            }
                            thread::yield_now();
                        }
                    }
                }
                local
            })
        })
        .collect();

    for producer in producers {
        producer.join().unwrap();
    }
    producers_done.store(true, Ordering::Release);

    let mut collected = Vec::with_capacity(total);
    for consumer in consumers {
        collected.extend(consumer.join().unwrap());
    }

    assert_eq!(collected.len(), total);
    collected.sort_unstable();
    let before_dedup = collected.len();
    collected.dedup();
    assert_eq!(collected.len(), before_dedup, "duplicate item observed");

    let mut expected: Vec<u64> = (0..3u64)
        .flat_map(|p| (0..items_per_producer).map(move |i| p * 10_000 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(collected, expected);
}

#[test]
fn batch_consumer_drains_everything() {
    let queue = Arc::new(BoundedQueue::new(256));

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            for i in 0..1000u64 {
                push_retrying(&queue, i);
            }
        })
    };

    let mut collected = Vec::with_capacity(1000);
    let mut batch = Vec::with_capacity(64);
    while collected.len() < 1000 {
        if queue.try_pop_batch(&mut batch, 64) == 0 {
            thread::yield_now();
            continue;
        }
        collected.append(&mut batch);
    }
    producer.join().unwrap();

    collected.sort_unstable();
    let expected: Vec<u64> = (0..1000).collect();
    assert_eq!(collected, expected);
    assert!(queue.is_empty());
}

#[test]
fn shutdown_unparks_waiting_consumer_promptly() {
    let queue = Arc::new(BoundedQueue::<u64>::new(16));

    let waiter = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            queue.wait_for_item(100);
            queue.is_shutdown()
        })
    };

    thread::sleep(Duration::from_millis(50));
    let signalled_at = Instant::now();
    queue.signal_shutdown();
    let observed_shutdown = waiter.join().unwrap();

    assert!(observed_shutdown);
    assert!(signalled_at.elapsed() < Duration::from_secs(1));
}
