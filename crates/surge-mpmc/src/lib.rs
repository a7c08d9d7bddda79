//! # Queue layer for the surge dispatch core
//!
//! This crate provides the queues a `surge-pool` worker pool drains:
//!
//! - [`BoundedQueue`]: a bounded lock-free multi-producer/multi-consumer
//!   ring buffer with batch dequeue, idle waiting, shutdown notification
//!   and throughput metering.
//! - [`LockedQueue`]: a mutex-guarded unbounded queue satisfying the same
//!   contract, for workloads that prefer simplicity over lock freedom.
//! - [`TaskQueue`]: the trait both implement, and the only thing the pool
//!   knows about its queue.
//!
//! All operations are non-blocking and report failure through return
//! values; nothing in this crate panics on full or empty queues.

pub mod locked;
pub mod queue;
pub mod ring;

pub use locked::LockedQueue;
pub use queue::TaskQueue;
pub use ring::BoundedQueue;
