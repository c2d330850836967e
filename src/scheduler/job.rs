//! Task definitions for the scheduler.
//!
//! This module defines the core task types used in the scheduling system:
//!
//! - `Task`: A unit of submitted work, owned by the coordinator until it resolves
//! - `TaskId`: Stable identifier generated at submission time
//! - `Priority`: Queue placement hint
//! - `SubmitOptions`: Caller-side options for a submission
//! - `TaskHandle`: Future resolving to the task's terminal outcome

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TaskError;

/// Terminal outcome of a task as seen by the caller.
pub type TaskResult = Result<serde_json::Value, TaskError>;

/// Progress callback, invoked with a percentage in `0..=100`.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Unique identifier of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a fresh random task id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Queue placement hint for a task.
///
/// `High` tasks go ahead of every queued `Normal`/`Low` task. `Normal` and
/// `Low` share a single FIFO class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Returns whether the task jumps ahead of the normal FIFO class.
    pub fn is_high(&self) -> bool {
        matches!(self, Self::High)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Normal => write!(f, "normal"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Error returned when parsing an unknown priority name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown priority '{0}' (expected high, normal or low)")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

/// Options accepted by `WorkerPool::submit`.
#[derive(Clone, Default)]
pub struct SubmitOptions {
    /// Queue placement hint.
    pub priority: Priority,
    /// Called on the coordinator with each progress report.
    pub on_progress: Option<ProgressCallback>,
    /// Caller-owned cancellation signal linked to the task.
    pub cancel_signal: Option<CancellationToken>,
}

impl SubmitOptions {
    /// Creates options with normal priority and no callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the progress callback.
    pub fn with_progress(mut self, callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    /// Links an external cancellation signal.
    ///
    /// Cancelling `signal` cancels the task. Cancelling the task through the
    /// pool never cancels `signal`.
    pub fn with_cancel_signal(mut self, signal: CancellationToken) -> Self {
        self.cancel_signal = Some(signal);
        self
    }
}

impl fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("priority", &self.priority)
            .field("on_progress", &self.on_progress.is_some())
            .field("cancel_signal", &self.cancel_signal)
            .finish()
    }
}

/// A unit of submitted work.
///
/// Owned by the coordinator from submission until it is resolved. Resolving
/// consumes the task, so each task has exactly one terminal outcome.
pub struct Task {
    /// Identifier handed back to the caller.
    pub id: TaskId,
    /// Operation name; opaque to the scheduler.
    pub kind: String,
    /// Priority the task was submitted with.
    pub priority: Priority,
    /// When the task was submitted.
    pub submitted_at: DateTime<Utc>,
    payload: serde_json::Value,
    on_progress: Option<ProgressCallback>,
    cancel: CancellationToken,
    reply: oneshot::Sender<TaskResult>,
}

impl Task {
    /// Creates a task and the handle that observes its outcome.
    pub(crate) fn new(
        id: TaskId,
        kind: impl Into<String>,
        payload: serde_json::Value,
        options: SubmitOptions,
    ) -> (Self, TaskHandle) {
        let (reply, rx) = oneshot::channel();
        let cancel = match options.cancel_signal {
            Some(signal) => signal.child_token(),
            None => CancellationToken::new(),
        };

        let task = Self {
            id,
            kind: kind.into(),
            priority: options.priority,
            submitted_at: Utc::now(),
            payload,
            on_progress: options.on_progress,
            cancel,
            reply,
        };

        (task, TaskHandle::new(id, rx))
    }

    /// The cancellation token observed by the executing worker.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Moves the payload out, leaving `null` behind.
    pub(crate) fn take_payload(&mut self) -> serde_json::Value {
        std::mem::take(&mut self.payload)
    }

    /// Puts back a payload returned by a failed dispatch.
    pub(crate) fn restore_payload(&mut self, payload: serde_json::Value) {
        self.payload = payload;
    }

    /// Returns how long the task has existed.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.submitted_at
    }

    /// Forwards a progress report to the caller's callback, if any.
    ///
    /// A panicking callback is contained here; it never reaches the coordinator.
    pub(crate) fn report_progress(&self, percent: u8) {
        let Some(callback) = &self.on_progress else {
            return;
        };

        let percent = percent.min(100);
        if panic::catch_unwind(AssertUnwindSafe(|| callback(percent))).is_err() {
            tracing::warn!(task_id = %self.id, "Progress callback panicked");
        }
    }

    /// Delivers the terminal outcome.
    ///
    /// Returns `false` if the caller already dropped its handle.
    pub(crate) fn resolve(self, outcome: TaskResult) -> bool {
        self.reply.send(outcome).is_ok()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("submitted_at", &self.submitted_at)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// Caller-side handle to a submitted task.
    ///
    /// Resolves once the task reaches its terminal state. If the pool goes
    /// away without resolving it, the handle yields `TaskError::PoolShutdown`.
    #[derive(Debug)]
    pub struct TaskHandle {
        id: TaskId,
        #[pin]
        rx: oneshot::Receiver<TaskResult>,
    }
}

impl TaskHandle {
    fn new(id: TaskId, rx: oneshot::Receiver<TaskResult>) -> Self {
        Self { id, rx }
    }

    /// The id of the task this handle observes.
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.rx.poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::PoolShutdown)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Builds a task with default options for unit tests.
#[cfg(test)]
pub(crate) fn test_task(kind: &str, priority: Priority) -> (Task, TaskHandle) {
    Task::new(
        TaskId::new(),
        kind,
        serde_json::json!({ "kind": kind }),
        SubmitOptions::new().with_priority(priority),
    )
}
