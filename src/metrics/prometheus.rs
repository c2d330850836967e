//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by docpool and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::{Mutex, OnceLock};

/// Global Prometheus registry for all docpool metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of tasks that reached a terminal state, labeled by outcome and kind.
pub static TASKS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Task execution time on a worker in seconds, labeled by kind.
pub static TASK_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of tasks waiting in the queue.
pub static QUEUE_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Number of workers currently running a task.
pub static BUSY_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Number of live worker threads.
pub static LIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Total number of worker crashes.
pub static WORKER_CRASHES: OnceLock<Counter> = OnceLock::new();

/// Serializes concurrent `init_metrics` calls.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Initialize all metrics and register them with the registry.
///
/// This function should be called once at application startup. Recording
/// before initialization is a no-op.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let tasks_total = CounterVec::new(
        Opts::new(
            "docpool_tasks_total",
            "Total number of tasks that reached a terminal state",
        ),
        &["outcome", "kind"],
    )?;

    let task_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "docpool_task_duration_seconds",
            "Task execution time on a worker in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
        &["kind"],
    )?;

    let queue_depth = Gauge::new("docpool_queue_depth", "Number of tasks waiting in the queue")?;

    let busy_workers = Gauge::new(
        "docpool_busy_workers",
        "Number of workers currently running a task",
    )?;

    let live_workers = Gauge::new("docpool_live_workers", "Number of live worker threads")?;

    let worker_crashes = Counter::new(
        "docpool_worker_crashes_total",
        "Total number of worker crashes",
    )?;

    registry.register(Box::new(tasks_total.clone()))?;
    registry.register(Box::new(task_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(busy_workers.clone()))?;
    registry.register(Box::new(live_workers.clone()))?;
    registry.register(Box::new(worker_crashes.clone()))?;

    let _ = REGISTRY.set(registry);
    let _ = TASKS_TOTAL.set(tasks_total);
    let _ = TASK_DURATION.set(task_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = BUSY_WORKERS.set(busy_workers);
    let _ = LIVE_WORKERS.set(live_workers);
    let _ = WORKER_CRASHES.set(worker_crashes);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem instead.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        // First call should succeed or metrics already initialized
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        if let Some(crashes) = WORKER_CRASHES.get() {
            crashes.inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.is_empty());
        assert!(!metrics.starts_with("# Error"));
        if REGISTRY.get().is_some() {
            assert!(metrics.contains("docpool_worker_crashes_total"));
        }
    }
}
