//! Metric recording for the worker pool.
//!
//! The `MetricsCollector` wraps the raw Prometheus metrics so the coordinator
//! records through one place with consistent labels. Every method is a no-op
//! until [`init_metrics`](super::init_metrics) has run.

use super::prometheus::{
    BUSY_WORKERS, LIVE_WORKERS, QUEUE_DEPTH, TASKS_TOTAL, TASK_DURATION, WORKER_CRASHES,
};

/// Metrics collector for pool activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record a task reaching its terminal state.
    ///
    /// # Arguments
    ///
    /// * `outcome` - Outcome label ("completed", "failed", "crashed", ...)
    /// * `kind` - Task kind
    /// * `run_secs` - Time spent on a worker, if the task ever ran
    pub fn record_task(&self, outcome: &str, kind: &str, run_secs: Option<f64>) {
        if let Some(tasks_total) = TASKS_TOTAL.get() {
            tasks_total.with_label_values(&[outcome, kind]).inc();
        }

        if let (Some(task_duration), Some(secs)) = (TASK_DURATION.get(), run_secs) {
            task_duration.with_label_values(&[kind]).observe(secs);
        }

        tracing::trace!(
            outcome = outcome,
            kind = kind,
            run_secs = run_secs,
            "Recorded task metric"
        );
    }

    /// Record a worker crash.
    pub fn record_worker_crash(&self) {
        if let Some(crashes) = WORKER_CRASHES.get() {
            crashes.inc();
        }
    }

    /// Update the pool gauges from a status snapshot.
    ///
    /// # Arguments
    ///
    /// * `live` - Number of live worker threads
    /// * `busy` - Number of workers running a task
    /// * `queued` - Number of tasks waiting in the queue
    pub fn update_pool(&self, live: usize, busy: usize, queued: usize) {
        if let Some(gauge) = LIVE_WORKERS.get() {
            gauge.set(live as f64);
        }
        if let Some(gauge) = BUSY_WORKERS.get() {
            gauge.set(busy as f64);
        }
        if let Some(gauge) = QUEUE_DEPTH.get() {
            gauge.set(queued as f64);
        }
    }
}
