//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks queue depth, worker occupancy, task outcomes and worker crashes.
//!
//! # Example
//!
//! ```ignore
//! use docpool::metrics::{init_metrics, export_metrics};
//!
//! // Initialize metrics on startup
//! init_metrics().expect("Failed to initialize metrics");
//!
//! // ... run the pool ...
//!
//! // Export metrics for Prometheus scraping
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    BUSY_WORKERS, LIVE_WORKERS, QUEUE_DEPTH, REGISTRY, TASKS_TOTAL, TASK_DURATION,
    WORKER_CRASHES,
};
