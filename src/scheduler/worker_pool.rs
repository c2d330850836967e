//! Bounded worker pool for document-processing tasks.
//!
//! [`WorkerPool`] is a cheap, cloneable handle to a coordinator task that
//! owns the task queue, the worker registry and the assignment table. Every
//! public operation is a message to that coordinator, so all scheduling
//! state is mutated from a single control flow.
//!
//! # Features
//!
//! - At most `max_workers` tasks run at once, each on its own OS thread
//! - High-priority tasks jump the queue
//! - Queued tasks cancel synchronously; running tasks cancel cooperatively
//! - A crashed worker fails only its own task and is replaced in place
//! - Graceful shutdown resolves every outstanding handle

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::error::ConfigError;

use super::coordinator::{Command, Coordinator};
use super::job::{SubmitOptions, Task, TaskHandle, TaskId};
use super::worker::TaskExecutor;

/// Ceiling applied to the detected hardware parallelism.
const MAX_DEFAULT_WORKERS: usize = 8;

/// Fallback when hardware parallelism cannot be detected.
const FALLBACK_PARALLELISM: usize = 4;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The configuration cannot be used.
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// The pool must be started from inside a tokio runtime.
    #[error("No tokio runtime available to host the coordinator")]
    NoRuntime,

    /// Worker thread creation failed.
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Returns `min(available parallelism, 8)`.
pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(FALLBACK_PARALLELISM)
        .min(MAX_DEFAULT_WORKERS)
}

/// Configuration for the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerPoolConfig {
    /// Maximum number of concurrently live workers.
    pub max_workers: usize,
    /// Workers spawned eagerly when the pool starts (capped at `max_workers`).
    pub warm_workers: usize,
    /// Maximum number of queued tasks; `None` queues without limit.
    pub max_queue_depth: Option<usize>,
    /// How long `shutdown` waits for worker threads to exit, in milliseconds.
    pub shutdown_timeout_ms: u64,
    /// Worker threads are named `{prefix}-{slot}`.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            warm_workers: 2,
            max_queue_depth: None,
            shutdown_timeout_ms: 30_000,
            thread_name_prefix: "docpool-worker".to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified worker ceiling.
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            ..Default::default()
        }
    }

    /// Sets the number of eagerly spawned workers.
    pub fn with_warm_workers(mut self, warm_workers: usize) -> Self {
        self.warm_workers = warm_workers;
        self
    }

    /// Sets the queue depth limit.
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = Some(depth);
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the worker thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// The shutdown timeout as a `Duration`.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Number of workers actually spawned at start.
    pub fn effective_warm_workers(&self) -> usize {
        self.warm_workers.min(self.max_workers)
    }

    /// Parses a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.check()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Renders the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        self.check()
            .map_err(|e| PoolError::InvalidConfig(e.to_string()))
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "thread_name_prefix".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Point-in-time snapshot of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Live worker threads.
    pub worker_count: usize,
    /// Live workers waiting for a task.
    pub idle_count: usize,
    /// Workers running a task.
    pub busy_count: usize,
    /// Tasks waiting for a worker.
    pub queued_count: usize,
}

/// Cumulative counters since the pool started.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolStats {
    /// Tasks that resolved with a value.
    pub tasks_completed: u64,
    /// Tasks whose executor reported an error.
    pub tasks_failed: u64,
    /// Tasks rejected as cancelled.
    pub tasks_cancelled: u64,
    /// Tasks lost to a worker crash.
    pub tasks_crashed: u64,
    /// Submissions rejected because the queue was full.
    pub tasks_rejected: u64,
    /// Workers replaced after a crash.
    pub worker_replacements: u64,
    /// Average time a task spent on a worker.
    pub average_run_time: Duration,
}

impl PoolStats {
    /// Returns the number of tasks that ran to an executor verdict.
    pub fn total_processed(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.tasks_completed as f64 / total as f64) * 100.0
    }
}

/// Handle to a running worker pool.
///
/// Cloning is cheap; all clones talk to the same coordinator. When the last
/// clone is dropped the coordinator shuts the pool down on its own.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    commands: mpsc::UnboundedSender<Command>,
    config: Arc<WorkerPoolConfig>,
}

impl WorkerPool {
    /// Starts a pool running `executor` on its workers.
    ///
    /// Spawns the warm workers and the coordinator task.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` for an unusable configuration,
    /// `PoolError::NoRuntime` outside a tokio runtime and
    /// `PoolError::WorkerSpawn` if a warm worker cannot be created.
    pub fn start(config: WorkerPoolConfig, executor: impl TaskExecutor) -> Result<Self, PoolError> {
        Self::start_shared(config, Arc::new(executor))
    }

    /// Starts a pool with an executor shared with other pools.
    pub fn start_shared(
        config: WorkerPoolConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();

        let mut coordinator = Coordinator::new(config.clone(), executor, events);
        coordinator.warm_up()?;
        runtime.spawn(coordinator.run(commands_rx, events_rx));

        info!(
            max_workers = config.max_workers,
            warm_workers = config.effective_warm_workers(),
            max_queue_depth = ?config.max_queue_depth,
            "Worker pool started"
        );

        Ok(Self {
            commands,
            config: Arc::new(config),
        })
    }

    /// Submits a task and returns a handle to its outcome.
    ///
    /// Never blocks. If the pool is no longer running the handle resolves
    /// with `TaskError::PoolShutdown`.
    pub fn submit(
        &self,
        kind: impl Into<String>,
        payload: serde_json::Value,
        options: SubmitOptions,
    ) -> TaskHandle {
        let (task, handle) = Task::new(TaskId::new(), kind, payload, options);
        // On failure the task is dropped with the command, which resolves the
        // handle as shut down.
        let _ = self.commands.send(Command::Submit(task));
        handle
    }

    /// Cancels a task.
    ///
    /// A queued task is removed and rejected with `TaskError::Cancelled`. A
    /// running task only has its cancellation token signalled; it may still
    /// resolve normally. Returns `false` if the id is unknown or already
    /// terminal.
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Cancel { task_id, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Cancels every queued task and signals every running one.
    pub async fn cancel_all(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::CancelAll { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Returns a snapshot of worker and queue occupancy.
    pub async fn status(&self) -> Result<PoolStatus, PoolError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Status { reply })
            .map_err(|_| PoolError::NotRunning)?;
        rx.await.map_err(|_| PoolError::NotRunning)
    }

    /// Returns cumulative task and worker counters.
    pub async fn stats(&self) -> Result<PoolStats, PoolError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .map_err(|_| PoolError::NotRunning)?;
        rx.await.map_err(|_| PoolError::NotRunning)
    }

    /// Shuts the pool down.
    ///
    /// Every queued and running task is rejected with
    /// `TaskError::PoolShutdown` and running tasks have their tokens
    /// signalled. Then waits up to the configured timeout for the worker
    /// threads to exit; threads still running after that are detached.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NotRunning` if the pool was already shut down and
    /// `PoolError::ShutdownTimeout` if workers outlive the timeout, and
    /// `PoolError::WorkerSpawn` if the join thread cannot be created.
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { reply })
            .map_err(|_| PoolError::NotRunning)?;
        let threads = rx.await.map_err(|_| PoolError::NotRunning)?;

        let timeout = self.config.shutdown_timeout();
        let (joined_tx, joined_rx) = oneshot::channel();
        // A detached thread, so a worker that never exits cannot hold up
        // runtime teardown after the timeout fires.
        std::thread::Builder::new()
            .name(format!("{}-join", self.config.thread_name_prefix))
            .spawn(move || {
                join_workers(threads);
                let _ = joined_tx.send(());
            })?;

        match tokio::time::timeout(timeout, joined_rx).await {
            Ok(Ok(())) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Ok(Err(_)) => {
                error!("Worker join thread exited without reporting");
                Ok(())
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.shutdown_timeout_ms,
                    "Worker threads still running after shutdown timeout, detaching them"
                );
                Err(PoolError::ShutdownTimeout(timeout))
            }
        }
    }

    /// Returns whether the coordinator is still accepting work.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// The configuration the pool was started with.
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

fn join_workers(threads: Vec<JoinHandle<()>>) {
    for thread in threads {
        let name = thread.thread().name().map(str::to_string);
        if thread.join().is_err() {
            error!(worker = ?name, "Worker thread panicked during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_pool_config_default() {
        let config = WorkerPoolConfig::default();

        assert!(config.max_workers >= 1);
        assert!(config.max_workers <= MAX_DEFAULT_WORKERS);
        assert_eq!(config.warm_workers, 2);
        assert_eq!(config.max_queue_depth, None);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(30));
        assert_eq!(config.thread_name_prefix, "docpool-worker");
    }

    #[test]
    fn test_worker_pool_config_builder() {
        let config = WorkerPoolConfig::new(6)
            .with_warm_workers(3)
            .with_max_queue_depth(100)
            .with_shutdown_timeout(Duration::from_millis(1500))
            .with_thread_name_prefix("pdf");

        assert_eq!(config.max_workers, 6);
        assert_eq!(config.warm_workers, 3);
        assert_eq!(config.max_queue_depth, Some(100));
        assert_eq!(config.shutdown_timeout_ms, 1500);
        assert_eq!(config.thread_name_prefix, "pdf");
    }

    #[test]
    fn test_warm_workers_capped_by_max() {
        assert_eq!(WorkerPoolConfig::new(1).effective_warm_workers(), 1);
        assert_eq!(
            WorkerPoolConfig::new(8).with_warm_workers(0).effective_warm_workers(),
            0
        );
    }

    #[test]
    fn test_config_validation() {
        let err = WorkerPoolConfig::new(0).validate().unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
        assert!(err.to_string().contains("max_workers"));

        let err = WorkerPoolConfig::new(2)
            .with_thread_name_prefix("  ")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("thread_name_prefix"));

        assert!(WorkerPoolConfig::new(2).validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml_partial() {
        let config = WorkerPoolConfig::from_yaml_str("max_workers: 3\nmax_queue_depth: 10\n")
            .expect("valid yaml");

        assert_eq!(config.max_workers, 3);
        assert_eq!(config.max_queue_depth, Some(10));
        assert_eq!(config.warm_workers, 2);
    }

    #[test]
    fn test_config_from_yaml_rejects_unknown_and_invalid() {
        let err = WorkerPoolConfig::from_yaml_str("max_wrokers: 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));

        let err = WorkerPoolConfig::from_yaml_str("max_workers: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pool.yaml");
        std::fs::write(&path, "max_workers: 5\nwarm_workers: 1\n").expect("write config");

        let config = WorkerPoolConfig::from_file(&path).expect("load config");
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.warm_workers, 1);

        let missing = WorkerPoolConfig::from_file(dir.path().join("missing.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_config_yaml_output_parses_back() {
        let config = WorkerPoolConfig::new(4).with_max_queue_depth(9);
        let yaml = config.to_yaml().expect("render yaml");
        assert!(yaml.contains("max_workers: 4"));
        assert_eq!(WorkerPoolConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_pool_stats_default() {
        let stats = PoolStats::default();

        assert_eq!(stats.tasks_completed, 0);
        assert_eq!(stats.tasks_failed, 0);
        assert_eq!(stats.average_run_time, Duration::ZERO);
        assert_eq!(stats.total_processed(), 0);
        assert!((stats.success_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_stats_calculations() {
        let stats = PoolStats {
            tasks_completed: 80,
            tasks_failed: 20,
            tasks_cancelled: 5,
            ..Default::default()
        };

        assert_eq!(stats.total_processed(), 100);
        assert!((stats.success_rate() - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::NotRunning;
        assert!(err.to_string().contains("not running"));

        let err = PoolError::ShutdownTimeout(Duration::from_secs(60));
        assert!(err.to_string().contains("60"));

        let err = PoolError::NoRuntime;
        assert!(err.to_string().contains("runtime"));
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let executor = |_: &crate::scheduler::worker::TaskContext,
                        _: &str,
                        payload: serde_json::Value|
         -> anyhow::Result<serde_json::Value> { Ok(payload) };
        let err = WorkerPool::start(WorkerPoolConfig::new(1), executor).unwrap_err();
        assert!(matches!(err, PoolError::NoRuntime));
    }
}
