//! docpool: Bounded parallel task scheduler for document-processing jobs.
//!
//! This library runs CPU-heavy document operations on a fixed-size pool of
//! worker threads, with priority queueing, cooperative cancellation and
//! crash isolation.

// Core modules
pub mod cli;
pub mod error;
pub mod metrics;
pub mod scheduler;

// Re-export commonly used types
pub use error::{ConfigError, TaskError};
pub use scheduler::{
    PoolError, PoolStats, PoolStatus, Priority, SubmitOptions, TaskContext, TaskExecutor,
    TaskHandle, TaskId, WorkerPool, WorkerPoolConfig,
};
