//! Error types for docpool.
//!
//! - `TaskError`: the rejection half of a task's terminal outcome
//! - `ConfigError`: loading and validating pool configuration
//!
//! Pool-level failures (`PoolError`) live next to the pool in
//! `scheduler::worker_pool`.

use thiserror::Error;

/// Why a submitted task did not produce a value.
///
/// Every task ends in exactly one of: a value, or one of these variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The executor reported an error while running the task.
    #[error("Task failed: {message}")]
    Failed { message: String },

    /// The worker running the task terminated unexpectedly.
    #[error("Worker crashed: {reason}")]
    WorkerCrashed { reason: String },

    /// The task was cancelled before it produced a result.
    #[error("Task cancelled")]
    Cancelled,

    /// The task queue was at its configured depth limit and no worker was free.
    #[error("Task queue is full ({limit} tasks waiting)")]
    QueueFull { limit: usize },

    /// The pool shut down before the task reached a terminal state.
    #[error("Worker pool shut down")]
    PoolShutdown,
}

impl TaskError {
    /// Returns whether this is a cancellation rejection.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns whether the task was lost to a worker crash.
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::WorkerCrashed { .. })
    }

    /// Short label used for metrics and log fields.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::WorkerCrashed { .. } => "crashed",
            Self::Cancelled => "cancelled",
            Self::QueueFull { .. } => "rejected",
            Self::PoolShutdown => "shutdown",
        }
    }
}

/// Errors that can occur while loading pool configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display() {
        let err = TaskError::Failed {
            message: "bad page range".to_string(),
        };
        assert!(err.to_string().contains("bad page range"));

        let err = TaskError::WorkerCrashed {
            reason: "stack overflow".to_string(),
        };
        assert!(err.to_string().contains("crashed"));
        assert!(err.to_string().contains("stack overflow"));

        let err = TaskError::QueueFull { limit: 16 };
        assert!(err.to_string().contains("16"));
    }

    #[test]
    fn test_task_error_classification() {
        assert!(TaskError::Cancelled.is_cancelled());
        assert!(!TaskError::PoolShutdown.is_cancelled());
        assert!(TaskError::WorkerCrashed {
            reason: String::new()
        }
        .is_crash());
        assert_eq!(TaskError::Cancelled.outcome_label(), "cancelled");
        assert_eq!(TaskError::QueueFull { limit: 1 }.outcome_label(), "rejected");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            key: "max_workers".to_string(),
            message: "must be at least 1".to_string(),
        };
        assert!(err.to_string().contains("max_workers"));
    }
}
