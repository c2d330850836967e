//! Execution workers.
//!
//! Each worker is a dedicated OS thread that runs one task at a time and
//! talks to the coordinator only through channels:
//!
//! - coordinator → worker: [`Dispatch`] messages
//! - worker → coordinator: [`WorkerMessage`]s wrapped in [`WorkerEvent`]s
//!
//! A panic anywhere in the worker body ends the thread and is reported as a
//! [`WorkerEvent::Crashed`] lifecycle event instead of a message.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::job::TaskId;

/// The document-processing logic run on worker threads.
///
/// Implementations run synchronously on a dedicated thread and may block.
/// Long-running work should poll [`TaskContext::is_cancelled`] and bail out
/// early when it returns `true`.
pub trait TaskExecutor: Send + Sync + 'static {
    /// Runs one task of the given kind to completion.
    fn execute(
        &self,
        ctx: &TaskContext,
        kind: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;
}

impl<F> TaskExecutor for F
where
    F: Fn(&TaskContext, &str, serde_json::Value) -> anyhow::Result<serde_json::Value>
        + Send
        + Sync
        + 'static,
{
    fn execute(
        &self,
        ctx: &TaskContext,
        kind: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        self(ctx, kind, payload)
    }
}

/// Messages a worker sends about the task it is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Intermediate progress, 0-100.
    Progress { task_id: TaskId, percent: u8 },
    /// The task finished with a value.
    Result {
        task_id: TaskId,
        value: serde_json::Value,
    },
    /// The task finished with an error.
    Error { task_id: TaskId, message: String },
}

impl WorkerMessage {
    /// The task this message refers to.
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Progress { task_id, .. }
            | Self::Result { task_id, .. }
            | Self::Error { task_id, .. } => *task_id,
        }
    }
}

/// Everything the coordinator hears from its workers.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Message {
        slot: usize,
        generation: u64,
        message: WorkerMessage,
    },
    Crashed {
        slot: usize,
        generation: u64,
        reason: String,
    },
}

/// A task handed to a worker.
#[derive(Debug)]
pub(crate) struct Dispatch {
    pub task_id: TaskId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub cancel: CancellationToken,
}

/// Per-task view given to the executor.
#[derive(Debug)]
pub struct TaskContext {
    task_id: TaskId,
    cancel: CancellationToken,
    slot: usize,
    generation: u64,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl TaskContext {
    /// The id of the running task.
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns whether the caller asked for this task to stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The task's cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Reports progress; values above 100 are clamped.
    pub fn report_progress(&self, percent: u8) {
        let message = WorkerMessage::Progress {
            task_id: self.task_id,
            percent: percent.min(100),
        };
        // Coordinator gone means the pool is shutting down; nothing to report to.
        let _ = self.events.send(WorkerEvent::Message {
            slot: self.slot,
            generation: self.generation,
            message,
        });
    }
}

/// Coordinator-side handle to a worker thread.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    slot: usize,
    generation: u64,
    jobs: mpsc::UnboundedSender<Dispatch>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawns a worker thread for `slot` at `generation`.
    pub(crate) fn spawn(
        slot: usize,
        generation: u64,
        name_prefix: &str,
        executor: Arc<dyn TaskExecutor>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> io::Result<Self> {
        let (jobs, jobs_rx) = mpsc::unbounded_channel();

        let thread = thread::Builder::new()
            .name(format!("{name_prefix}-{slot}"))
            .spawn(move || run_worker(slot, generation, executor, jobs_rx, events))?;

        debug!(slot = slot, generation = generation, "Worker spawned");

        Ok(Self {
            slot,
            generation,
            jobs,
            thread,
        })
    }

    /// Hands a task to the worker. Gives the dispatch back if the thread is gone.
    pub(crate) fn send(&self, dispatch: Dispatch) -> Result<(), Dispatch> {
        self.jobs.send(dispatch).map_err(|e| e.0)
    }

    /// Slot this worker occupies.
    pub(crate) fn slot(&self) -> usize {
        self.slot
    }

    /// Generation this worker was spawned at.
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Closes the dispatch channel and returns the thread for joining.
    ///
    /// The worker exits after finishing its current task, if any.
    pub(crate) fn stop(self) -> JoinHandle<()> {
        drop(self.jobs);
        self.thread
    }
}

fn run_worker(
    slot: usize,
    generation: u64,
    executor: Arc<dyn TaskExecutor>,
    jobs: mpsc::UnboundedReceiver<Dispatch>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let serve_events = events.clone();
    let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
        serve(slot, generation, executor.as_ref(), jobs, serve_events)
    }));

    match outcome {
        Ok(()) => debug!(slot = slot, generation = generation, "Worker stopped"),
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            let _ = events.send(WorkerEvent::Crashed {
                slot,
                generation,
                reason,
            });
        }
    }
}

fn serve(
    slot: usize,
    generation: u64,
    executor: &dyn TaskExecutor,
    mut jobs: mpsc::UnboundedReceiver<Dispatch>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    while let Some(dispatch) = jobs.blocking_recv() {
        let task_id = dispatch.task_id;
        trace!(slot = slot, task_id = %task_id, kind = %dispatch.kind, "Worker picked up task");

        let ctx = TaskContext {
            task_id,
            cancel: dispatch.cancel,
            slot,
            generation,
            events: events.clone(),
        };

        let message = match executor.execute(&ctx, &dispatch.kind, dispatch.payload) {
            Ok(value) => WorkerMessage::Result { task_id, value },
            Err(e) => WorkerMessage::Error {
                task_id,
                message: format!("{e:#}"),
            },
        };

        let event = WorkerEvent::Message {
            slot,
            generation,
            message,
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "Worker crashed".to_string()
    }
}
