use std::io;

/// Errors surfaced by pool construction and startup.
///
/// Runtime conditions (full or empty queues, handler failures, shutdown)
/// never reach this type; they are value-level returns or are swallowed
/// inside the worker loop.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The configuration is inconsistent in a way clamping cannot fix.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The OS refused to create a thread.
    #[error("failed to spawn pool thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
