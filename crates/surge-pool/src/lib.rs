//! # Elastic worker pool for the surge dispatch core
//!
//! A [`WorkerPool`] binds a set of worker threads to any queue implementing
//! [`TaskQueue`] and drives their count from the queue's observed
//! push/pop ratio: a dedicated monitor thread samples
//! [`TaskQueue::throughput_ratio`] at a configurable cadence and, after a
//! hysteresis streak, activates or deactivates workers within the
//! configured bounds.
//!
//! ```no_run
//! use std::sync::Arc;
//! use surge_pool::{BoundedQueue, PoolConfig, WorkerPool};
//!
//! let queue = Arc::new(BoundedQueue::new(1024));
//! let pool = WorkerPool::new(Arc::clone(&queue), PoolConfig::default(), |item: &mut u64| {
//!     // process *item
//! })?;
//! pool.start()?;
//!
//! for i in 0..100u64 {
//!     let _ = queue.try_push(i);
//! }
//!
//! pool.wait();
//! pool.stop();
//! # Ok::<(), surge_pool::PoolError>(())
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod pool;

pub use config::PoolConfig;
pub use error::{PoolError, PoolResult};
pub use metrics::PoolMetricsSnapshot;
pub use pool::WorkerPool;

pub use surge_mpmc::{BoundedQueue, LockedQueue, TaskQueue};
