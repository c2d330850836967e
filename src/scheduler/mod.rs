//! Bounded parallel task scheduling for document-processing work.
//!
//! This module provides the worker pool and its building blocks:
//!
//! - **WorkerPool**: Caller-facing handle for submitting, cancelling and observing tasks
//! - **Coordinator**: Single control flow owning the queue, the registry and the assignments
//! - **TaskQueue**: Two-class priority queue of pending tasks
//! - **WorkerRegistry**: Slot arena tracking each worker's state and generation
//! - **Worker**: OS thread running one task at a time through a [`TaskExecutor`]
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Callers    │
//!                      │ (WorkerPool) │
//!                      └──────┬───────┘
//!                             │ commands
//!                      ┌──────▼───────┐
//!                      │ Coordinator  │◄────────────┐
//!                      │ queue + slots│             │ events
//!                      └──────┬───────┘             │
//!                             │ dispatch            │
//!         ┌───────────────────┼───────────────────┐ │
//!         │                   │                   │ │
//!         ▼                   ▼                   ▼ │
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Slot 0  │         │ Slot 1  │         │ Slot N  │
//!    └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use docpool::scheduler::{SubmitOptions, Priority, TaskContext, WorkerPool, WorkerPoolConfig};
//!
//! let pool = WorkerPool::start(
//!     WorkerPoolConfig::new(4),
//!     |ctx: &TaskContext, kind: &str, payload: serde_json::Value| -> anyhow::Result<serde_json::Value> {
//!         ctx.report_progress(50);
//!         Ok(serde_json::json!({ "kind": kind, "input": payload }))
//!     },
//! )?;
//!
//! let handle = pool.submit(
//!     "merge",
//!     serde_json::json!({ "files": ["a.pdf", "b.pdf"] }),
//!     SubmitOptions::new().with_priority(Priority::High),
//! );
//! let merged = handle.await?;
//!
//! pool.shutdown().await?;
//! ```
//!
//! # Reliability Features
//!
//! - **Bounded concurrency**: never more than `max_workers` tasks running
//! - **Crash isolation**: a panicking worker fails only its own task and is replaced in place
//! - **Stale event filtering**: messages from replaced workers are recognised by generation and dropped
//! - **Graceful shutdown**: every outstanding handle resolves, no caller waits forever

mod coordinator;
pub mod job;
pub mod queue;
pub mod registry;
pub mod worker;
pub mod worker_pool;

// Re-export main types for convenience
pub use job::{ParsePriorityError, Priority, ProgressCallback, SubmitOptions, TaskHandle, TaskId, TaskResult};
pub use registry::{SlotError, SlotState};
pub use worker::{TaskContext, TaskExecutor, WorkerMessage};
pub use worker_pool::{
    default_max_workers, PoolError, PoolStats, PoolStatus, WorkerPool, WorkerPoolConfig,
};
