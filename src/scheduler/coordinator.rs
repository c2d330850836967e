//! The coordinator: the single control flow behind a [`WorkerPool`].
//!
//! It owns the task queue, the worker registry and the assignment table, and
//! is the only code that mutates them. Callers reach it through [`Command`]s,
//! workers through [`WorkerEvent`]s; both are drained by one tokio task.
//!
//! [`WorkerPool`]: super::worker_pool::WorkerPool

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::error::TaskError;
use crate::metrics::MetricsCollector;

use super::job::{Task, TaskId, TaskResult};
use super::queue::TaskQueue;
use super::registry::WorkerRegistry;
use super::worker::{Dispatch, TaskExecutor, WorkerEvent, WorkerHandle, WorkerMessage};
use super::worker_pool::{PoolStats, PoolStatus, WorkerPoolConfig};

/// Requests from pool handles.
#[derive(Debug)]
pub(crate) enum Command {
    Submit(Task),
    Cancel {
        task_id: TaskId,
        reply: oneshot::Sender<bool>,
    },
    CancelAll {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<PoolStatus>,
    },
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    Shutdown {
        reply: oneshot::Sender<Vec<JoinHandle<()>>>,
    },
}

/// Assignment table entry: which slot runs the task, and since when.
#[derive(Debug)]
struct Assignment {
    slot: usize,
    task: Task,
    started: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    cancelled: u64,
    crashed: u64,
    rejected: u64,
    replacements: u64,
    run_time: Duration,
    timed_runs: u32,
}

impl Counters {
    fn record(&mut self, outcome: &TaskResult, run_time: Option<Duration>) {
        match outcome {
            Ok(_) => self.completed += 1,
            Err(TaskError::Failed { .. }) => self.failed += 1,
            Err(TaskError::Cancelled) => self.cancelled += 1,
            Err(TaskError::WorkerCrashed { .. }) => self.crashed += 1,
            Err(TaskError::QueueFull { .. }) => self.rejected += 1,
            Err(TaskError::PoolShutdown) => {}
        }
        if let Some(run_time) = run_time {
            self.run_time += run_time;
            self.timed_runs = self.timed_runs.saturating_add(1);
        }
    }

    fn to_pool_stats(&self) -> PoolStats {
        let average_run_time = if self.timed_runs > 0 {
            self.run_time / self.timed_runs
        } else {
            Duration::ZERO
        };

        PoolStats {
            tasks_completed: self.completed,
            tasks_failed: self.failed,
            tasks_cancelled: self.cancelled,
            tasks_crashed: self.crashed,
            tasks_rejected: self.rejected,
            worker_replacements: self.replacements,
            average_run_time,
        }
    }
}

pub(crate) struct Coordinator {
    config: WorkerPoolConfig,
    executor: Arc<dyn TaskExecutor>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    queue: TaskQueue,
    registry: WorkerRegistry<WorkerHandle>,
    assignments: HashMap<TaskId, Assignment>,
    counters: Counters,
    metrics: MetricsCollector,
}

impl Coordinator {
    pub(crate) fn new(
        config: WorkerPoolConfig,
        executor: Arc<dyn TaskExecutor>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            queue: TaskQueue::new(config.max_queue_depth),
            registry: WorkerRegistry::new(config.max_workers),
            assignments: HashMap::new(),
            counters: Counters::default(),
            metrics: MetricsCollector::new(),
            config,
            executor,
            events,
        }
    }

    /// Spawns the warm workers.
    pub(crate) fn warm_up(&mut self) -> io::Result<()> {
        for _ in 0..self.config.effective_warm_workers() {
            self.spawn_slot()?;
        }
        self.publish();
        Ok(())
    }

    /// Main loop. Returns after shutdown or once every pool handle is gone.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        loop {
            tokio::select! {
                biased;

                Some(event) = events.recv() => self.handle_event(event),

                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        info!("All pool handles dropped, shutting down");
                        // Nobody is left to join the threads; they exit on their own.
                        drop(self.shutdown());
                        break;
                    }
                },
            }
        }
    }

    /// Applies one command. Returns `false` once the pool has shut down.
    pub(crate) fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Submit(task) => self.submit(task),
            Command::Cancel { task_id, reply } => {
                let found = self.cancel(task_id);
                let _ = reply.send(found);
            }
            Command::CancelAll { reply } => {
                self.cancel_all();
                let _ = reply.send(());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.counters.to_pool_stats());
            }
            Command::Shutdown { reply } => {
                let threads = self.shutdown();
                let _ = reply.send(threads);
                return false;
            }
        }
        true
    }

    /// Applies one worker event.
    pub(crate) fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Message {
                slot,
                generation,
                message,
            } => {
                if !self.registry.is_current(slot, generation) {
                    trace!(slot = slot, generation = generation, "Ignoring message from replaced worker");
                    return;
                }

                match message {
                    WorkerMessage::Progress { task_id, percent } => {
                        if let Some(assignment) = self
                            .assignments
                            .get(&task_id)
                            .filter(|assignment| assignment.slot == slot)
                        {
                            trace!(task_id = %task_id, percent = percent, "Task progress");
                            assignment.task.report_progress(percent);
                        }
                    }
                    WorkerMessage::Result { task_id, value } => {
                        self.complete(slot, task_id, Ok(value));
                    }
                    WorkerMessage::Error { task_id, message } => {
                        self.complete(slot, task_id, Err(TaskError::Failed { message }));
                    }
                }
            }
            WorkerEvent::Crashed {
                slot,
                generation,
                reason,
            } => self.recover(slot, generation, reason),
        }
    }

    pub(crate) fn submit(&mut self, task: Task) {
        if self.queue.is_full() && !self.worker_available() {
            let limit = self.queue.max_depth().unwrap_or_default();
            warn!(task_id = %task.id, kind = %task.kind, limit = limit, "Task queue full, rejecting task");
            self.resolve(task, Err(TaskError::QueueFull { limit }), None);
            return;
        }

        debug!(
            task_id = %task.id,
            kind = %task.kind,
            priority = %task.priority,
            "Task submitted"
        );
        self.queue.push(task);
        self.dispatch();
    }

    /// Cancels a queued task outright, or signals a running one.
    pub(crate) fn cancel(&mut self, task_id: TaskId) -> bool {
        if let Some(task) = self.queue.remove(task_id) {
            debug!(task_id = %task_id, "Cancelled queued task");
            self.resolve(task, Err(TaskError::Cancelled), None);
            self.publish();
            return true;
        }

        if let Some(assignment) = self.assignments.get(&task_id) {
            debug!(task_id = %task_id, slot = assignment.slot, "Signalled cancellation to running task");
            assignment.task.cancel_token().cancel();
            return true;
        }

        false
    }

    pub(crate) fn cancel_all(&mut self) {
        let queued = self.queue.drain();
        let queued_count = queued.len();
        for task in queued {
            self.resolve(task, Err(TaskError::Cancelled), None);
        }

        for assignment in self.assignments.values() {
            assignment.task.cancel_token().cancel();
        }

        info!(
            queued = queued_count,
            running = self.assignments.len(),
            "Cancelled all tasks"
        );
        self.publish();
    }

    pub(crate) fn status(&self) -> PoolStatus {
        PoolStatus {
            worker_count: self.registry.live_count(),
            idle_count: self.registry.idle_count(),
            busy_count: self.registry.busy_count(),
            queued_count: self.queue.len(),
        }
    }

    /// Rejects every outstanding task and stops the workers.
    ///
    /// Returns the worker threads so the caller can join them.
    pub(crate) fn shutdown(&mut self) -> Vec<JoinHandle<()>> {
        let queued = self.queue.drain();
        let queued_count = queued.len();
        for task in queued {
            self.resolve(task, Err(TaskError::PoolShutdown), None);
        }

        let running: Vec<Assignment> = self.assignments.drain().map(|(_, a)| a).collect();
        let running_count = running.len();
        for assignment in running {
            assignment.task.cancel_token().cancel();
            let run_time = assignment.started.elapsed();
            self.resolve(assignment.task, Err(TaskError::PoolShutdown), Some(run_time));
        }

        let threads: Vec<JoinHandle<()>> = self
            .registry
            .drain()
            .into_iter()
            .map(|worker| {
                debug!(slot = worker.slot(), generation = worker.generation(), "Stopping worker");
                worker.stop()
            })
            .collect();

        info!(
            queued = queued_count,
            running = running_count,
            workers = threads.len(),
            "Worker pool shutting down"
        );
        self.publish();
        threads
    }

    /// Matches queued tasks to free workers until one side runs out.
    fn dispatch(&mut self) {
        while !self.queue.is_empty() {
            let Some(slot) = self.acquire_worker() else {
                break;
            };
            let Some(mut task) = self.queue.pop_front() else {
                break;
            };

            if task.is_cancelled() {
                debug!(task_id = %task.id, "Task cancelled while queued, not dispatching");
                self.resolve(task, Err(TaskError::Cancelled), None);
                continue;
            }

            let Some(worker) = self.registry.worker(slot) else {
                self.queue.push_front(task);
                break;
            };

            let dispatch = Dispatch {
                task_id: task.id,
                kind: task.kind.clone(),
                payload: task.take_payload(),
                cancel: task.cancel_token().clone(),
            };

            if let Err(returned) = worker.send(dispatch) {
                // The thread died without us hearing about it yet; any crash
                // event it left behind is made stale by the retire below.
                task.restore_payload(returned.payload);
                self.queue.push_front(task);
                self.replace(slot);
                continue;
            }

            if let Err(e) = self.registry.assign(slot, task.id) {
                error!(slot = slot, task_id = %task.id, error = %e, "Slot bookkeeping out of sync");
            }

            debug!(
                task_id = %task.id,
                kind = %task.kind,
                slot = slot,
                queued_ms = task.age().num_milliseconds(),
                "Task dispatched"
            );
            self.assignments.insert(
                task.id,
                Assignment {
                    slot,
                    task,
                    started: Instant::now(),
                },
            );
        }

        self.publish();
    }

    /// Finds an idle worker, reviving or creating one if allowed.
    fn acquire_worker(&mut self) -> Option<usize> {
        if let Some(slot) = self.registry.find_idle() {
            return Some(slot);
        }

        if let Some(slot) = self.registry.find_replacing() {
            return self.respawn(slot).then_some(slot);
        }

        if self.registry.has_capacity() {
            return match self.spawn_slot() {
                Ok(slot) => Some(slot),
                Err(e) => {
                    error!(error = %e, "Failed to spawn worker");
                    None
                }
            };
        }

        None
    }

    fn worker_available(&self) -> bool {
        self.registry.find_idle().is_some()
            || self.registry.find_replacing().is_some()
            || self.registry.has_capacity()
    }

    /// Creates a worker in a fresh slot.
    fn spawn_slot(&mut self) -> io::Result<usize> {
        let slot = self.registry.next_slot();
        let worker = WorkerHandle::spawn(
            slot,
            0,
            &self.config.thread_name_prefix,
            Arc::clone(&self.executor),
            self.events.clone(),
        )?;

        self.registry.insert(worker).map_err(|worker| {
            drop(worker.stop());
            io::Error::other("worker registry is at capacity")
        })
    }

    /// Starts a replacement worker in a retired slot.
    fn respawn(&mut self, slot: usize) -> bool {
        let Some(generation) = self.registry.generation(slot) else {
            return false;
        };

        let worker = match WorkerHandle::spawn(
            slot,
            generation,
            &self.config.thread_name_prefix,
            Arc::clone(&self.executor),
            self.events.clone(),
        ) {
            Ok(worker) => worker,
            Err(e) => {
                error!(slot = slot, error = %e, "Failed to spawn replacement worker");
                return false;
            }
        };

        match self.registry.revive(slot, worker) {
            Ok(()) => {
                self.counters.replacements += 1;
                info!(slot = slot, generation = generation, "Worker replaced");
                true
            }
            Err(e) => {
                error!(slot = slot, error = %e, "Cannot install replacement worker");
                false
            }
        }
    }

    /// Retires a slot's worker and starts a replacement.
    fn replace(&mut self, slot: usize) {
        match self.registry.retire(slot) {
            // The dead thread is already unwinding or gone; detach it.
            Ok(dead) => drop(dead.map(WorkerHandle::stop)),
            Err(e) => {
                error!(slot = slot, error = %e, "Cannot retire worker");
                return;
            }
        }
        self.respawn(slot);
    }

    fn complete(&mut self, slot: usize, task_id: TaskId, outcome: TaskResult) {
        if self.registry.task_on(slot) != Some(task_id) {
            warn!(slot = slot, task_id = %task_id, "Worker reported a task it is not running");
            return;
        }
        let Some(assignment) = self.assignments.remove(&task_id) else {
            error!(slot = slot, task_id = %task_id, "Busy slot has no assignment");
            return;
        };
        if let Err(e) = self.registry.release(slot) {
            error!(slot = slot, error = %e, "Slot bookkeeping out of sync");
        }

        let run_time = assignment.started.elapsed();

        match &outcome {
            Ok(_) => debug!(
                task_id = %task_id,
                slot = slot,
                duration_ms = run_time.as_millis() as u64,
                "Task completed"
            ),
            Err(e) => warn!(task_id = %task_id, slot = slot, error = %e, "Task failed"),
        }

        self.resolve(assignment.task, outcome, Some(run_time));
        self.dispatch();
    }

    fn recover(&mut self, slot: usize, generation: u64, reason: String) {
        if !self.registry.is_current(slot, generation) {
            debug!(slot = slot, generation = generation, "Ignoring crash of replaced worker");
            return;
        }

        self.metrics.record_worker_crash();
        let task_id = self.registry.task_on(slot);
        warn!(
            slot = slot,
            generation = generation,
            task_id = ?task_id,
            reason = %reason,
            "Worker crashed"
        );

        if let Some(assignment) = task_id.and_then(|id| self.assignments.remove(&id)) {
            let run_time = assignment.started.elapsed();
            self.resolve(
                assignment.task,
                Err(TaskError::WorkerCrashed { reason }),
                Some(run_time),
            );
        }

        self.replace(slot);
        self.dispatch();
    }

    fn resolve(&mut self, task: Task, outcome: TaskResult, run_time: Option<Duration>) {
        let label = match &outcome {
            Ok(_) => "completed",
            Err(e) => e.outcome_label(),
        };
        self.counters.record(&outcome, run_time);
        self.metrics
            .record_task(label, &task.kind, run_time.map(|d| d.as_secs_f64()));

        let task_id = task.id;
        if !task.resolve(outcome) {
            trace!(task_id = %task_id, "Caller dropped handle before outcome");
        }
    }

    fn publish(&self) {
        self.metrics.update_pool(
            self.registry.live_count(),
            self.registry.busy_count(),
            self.queue.len(),
        );
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        let busy = self.registry.busy_count();
        assert!(busy <= self.config.max_workers, "busy workers exceed max_workers");
        assert!(self.registry.len() <= self.config.max_workers);
        assert_eq!(busy, self.assignments.len());

        for (slot, task_id) in self.registry.busy_slots() {
            let assignment = self
                .assignments
                .get(&task_id)
                .expect("busy slot must have an assignment");
            assert_eq!(assignment.slot, slot);
        }
        for task_id in self.queue.ids() {
            assert!(
                !self.assignments.contains_key(&task_id),
                "task both queued and running"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{Priority, SubmitOptions, TaskHandle};
    use crate::scheduler::worker::TaskContext;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Executor used by these tests.
    ///
    /// - `echo` returns its payload
    /// - `hold` blocks until cancelled, then succeeds
    /// - `hold_then_fail` blocks until cancelled, then errors
    /// - `progress` reports 25 and 75, then succeeds
    /// - `crash` panics
    fn executor() -> Arc<dyn TaskExecutor> {
        Arc::new(
            |ctx: &TaskContext,
             kind: &str,
             payload: serde_json::Value|
             -> anyhow::Result<serde_json::Value> {
                match kind {
                    "echo" => Ok(payload),
                    "hold" => {
                        futures::executor::block_on(ctx.cancellation_token().cancelled());
                        Ok(json!("held"))
                    }
                    "hold_then_fail" => {
                        futures::executor::block_on(ctx.cancellation_token().cancelled());
                        anyhow::bail!("aborted mid-merge")
                    }
                    "progress" => {
                        ctx.report_progress(25);
                        ctx.report_progress(75);
                        Ok(json!("rendered"))
                    }
                    "crash" => panic!("segfault in renderer"),
                    other => anyhow::bail!("unknown kind {other}"),
                }
            },
        )
    }

    fn coordinator(config: WorkerPoolConfig) -> (Coordinator, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (Coordinator::new(config, executor(), events), events_rx)
    }

    fn submit(coord: &mut Coordinator, kind: &str, options: SubmitOptions) -> TaskHandle {
        let (task, handle) = Task::new(TaskId::new(), kind, json!({ "kind": kind }), options);
        coord.submit(task);
        coord.assert_invariants();
        handle
    }

    async fn pump(coord: &mut Coordinator, events: &mut mpsc::UnboundedReceiver<WorkerEvent>) {
        let event = events.recv().await.expect("worker event");
        coord.handle_event(event);
        coord.assert_invariants();
    }

    fn join(threads: Vec<JoinHandle<()>>) {
        for thread in threads {
            thread.join().expect("worker thread");
        }
    }

    #[tokio::test]
    async fn test_warm_up_spawns_capped_workers() {
        let (mut coord, _events) = coordinator(WorkerPoolConfig::new(1).with_warm_workers(2));
        coord.warm_up().unwrap();

        let status = coord.status();
        assert_eq!(status.worker_count, 1);
        assert_eq!(status.idle_count, 1);
        join(coord.shutdown());
    }

    #[tokio::test]
    async fn test_capacity_bound_and_drain_one_per_completion() {
        let (mut coord, mut events) = coordinator(WorkerPoolConfig::new(2).with_warm_workers(0));

        let handles: Vec<TaskHandle> = (0..5)
            .map(|_| submit(&mut coord, "hold", SubmitOptions::new()))
            .collect();

        let status = coord.status();
        assert_eq!(status.busy_count, 2);
        assert_eq!(status.queued_count, 3);
        assert_eq!(status.worker_count, 2);

        let mut remaining = handles.into_iter();
        for expected_queued in [2, 1, 0] {
            let handle = remaining.next().unwrap();
            assert!(coord.cancel(handle.id()));
            pump(&mut coord, &mut events).await;
            assert_eq!(handle.await, Ok(json!("held")));

            let status = coord.status();
            assert_eq!(status.busy_count, 2);
            assert_eq!(status.queued_count, expected_queued);
        }

        for handle in remaining {
            assert!(coord.cancel(handle.id()));
            pump(&mut coord, &mut events).await;
            assert_eq!(handle.await, Ok(json!("held")));
        }

        let status = coord.status();
        assert_eq!(status.busy_count, 0);
        assert_eq!(status.idle_count, 2);
        assert_eq!(coord.counters.to_pool_stats().tasks_completed, 5);
        join(coord.shutdown());
    }

    #[tokio::test]
    async fn test_queued_cancel_is_immediate_and_final() {
        let (mut coord, mut events) = coordinator(WorkerPoolConfig::new(1));
        let running = submit(&mut coord, "hold", SubmitOptions::new());
        let queued = submit(&mut coord, "echo", SubmitOptions::new());

        assert!(coord.cancel(queued.id()));
        coord.assert_invariants();
        assert!(!coord.cancel(queued.id()));
        assert_eq!(queued.await, Err(TaskError::Cancelled));
        assert_eq!(coord.status().queued_count, 0);

        assert!(coord.cancel(running.id()));
        pump(&mut coord, &mut events).await;
        assert_eq!(running.await, Ok(json!("held")));

        // Nothing else was dispatched.
        assert_eq!(coord.status().busy_count, 0);
        assert!(!coord.cancel(TaskId::new()));
        join(coord.shutdown());
    }

    #[tokio::test]
    async fn test_high_priority_dispatched_first() {
        let (mut coord, mut events) = coordinator(WorkerPoolConfig::new(1));
        let blocker = submit(&mut coord, "hold", SubmitOptions::new());
        let normal = submit(&mut coord, "hold", SubmitOptions::new());
        let high = submit(
            &mut coord,
            "hold",
            SubmitOptions::new().with_priority(Priority::High),
        );

        assert_eq!(coord.queue.ids().collect::<Vec<_>>(), vec![high.id(), normal.id()]);

        coord.cancel(blocker.id());
        pump(&mut coord, &mut events).await;
        assert_eq!(coord.registry.task_on(0), Some(high.id()));
        assert!(coord.queue.contains(normal.id()));

        join(coord.shutdown());
        assert_eq!(high.await, Err(TaskError::PoolShutdown));
        assert_eq!(normal.await, Err(TaskError::PoolShutdown));
    }

    #[tokio::test]
    async fn test_crash_fails_only_its_task_and_replaces_worker() {
        let (mut coord, mut events) = coordinator(WorkerPoolConfig::new(2));
        coord.warm_up().unwrap();
        let survivor = submit(&mut coord, "hold", SubmitOptions::new());
        let doomed = submit(&mut coord, "crash", SubmitOptions::new());

        pump(&mut coord, &mut events).await;
        match doomed.await {
            Err(TaskError::WorkerCrashed { reason }) => assert_eq!(reason, "segfault in renderer"),
            other => panic!("expected crash, got {other:?}"),
        }

        let status = coord.status();
        assert_eq!(status.worker_count, 2);
        assert_eq!(status.busy_count, 1);
        assert_eq!(coord.registry.generation(1), Some(1));

        let after = submit(&mut coord, "echo", SubmitOptions::new());
        pump(&mut coord, &mut events).await;
        assert_eq!(after.await, Ok(json!({ "kind": "echo" })));

        coord.cancel(survivor.id());
        pump(&mut coord, &mut events).await;
        assert_eq!(survivor.await, Ok(json!("held")));

        let stats = coord.counters.to_pool_stats();
        assert_eq!(stats.tasks_crashed, 1);
        assert_eq!(stats.worker_replacements, 1);
        assert_eq!(stats.tasks_completed, 2);
        join(coord.shutdown());
    }

    #[tokio::test]
    async fn test_stale_events_are_ignored() {
        let (mut coord, _events) = coordinator(WorkerPoolConfig::new(1));
        let running = submit(&mut coord, "hold", SubmitOptions::new());

        coord.handle_event(WorkerEvent::Message {
            slot: 0,
            generation: 9,
            message: WorkerMessage::Result {
                task_id: running.id(),
                value: json!("forged"),
            },
        });
        coord.handle_event(WorkerEvent::Crashed {
            slot: 0,
            generation: 9,
            reason: "old".to_string(),
        });
        coord.assert_invariants();
        assert_eq!(coord.status().busy_count, 1);

        // Current generation, but the wrong task id.
        coord.handle_event(WorkerEvent::Message {
            slot: 0,
            generation: 0,
            message: WorkerMessage::Result {
                task_id: TaskId::new(),
                value: json!("stray"),
            },
        });
        assert_eq!(coord.registry.task_on(0), Some(running.id()));

        join(coord.shutdown());
        assert_eq!(running.await, Err(TaskError::PoolShutdown));
    }

    #[tokio::test]
    async fn test_queue_full_rejects_only_without_free_worker() {
        let (mut coord, _events) =
            coordinator(WorkerPoolConfig::new(1).with_max_queue_depth(1));
        let running = submit(&mut coord, "hold", SubmitOptions::new());
        let queued = submit(&mut coord, "echo", SubmitOptions::new());
        let rejected = submit(&mut coord, "echo", SubmitOptions::new());

        assert_eq!(rejected.await, Err(TaskError::QueueFull { limit: 1 }));
        assert_eq!(coord.status().queued_count, 1);
        assert_eq!(coord.counters.to_pool_stats().tasks_rejected, 1);

        join(coord.shutdown());
        assert_eq!(running.await, Err(TaskError::PoolShutdown));
        assert_eq!(queued.await, Err(TaskError::PoolShutdown));
    }

    #[tokio::test]
    async fn test_zero_depth_queue_still_runs_on_free_worker() {
        let (mut coord, mut events) =
            coordinator(WorkerPoolConfig::new(1).with_max_queue_depth(0));
        let handle = submit(&mut coord, "echo", SubmitOptions::new());
        pump(&mut coord, &mut events).await;
        assert!(handle.await.is_ok());
        join(coord.shutdown());
    }

    #[tokio::test]
    async fn test_signal_fired_while_queued_rejects_at_dispatch() {
        let (mut coord, mut events) = coordinator(WorkerPoolConfig::new(1));
        let blocker = submit(&mut coord, "hold", SubmitOptions::new());

        let signal = CancellationToken::new();
        let queued = submit(
            &mut coord,
            "echo",
            SubmitOptions::new().with_cancel_signal(signal.clone()),
        );
        signal.cancel();

        coord.cancel(blocker.id());
        pump(&mut coord, &mut events).await;
        assert_eq!(queued.await, Err(TaskError::Cancelled));
        assert_eq!(coord.status().busy_count, 0);
        join(coord.shutdown());
    }

    #[tokio::test]
    async fn test_error_after_cancellation_keeps_worker_message() {
        let (mut coord, mut events) = coordinator(WorkerPoolConfig::new(1));
        let handle = submit(&mut coord, "hold_then_fail", SubmitOptions::new());

        assert!(coord.cancel(handle.id()));
        pump(&mut coord, &mut events).await;
        assert_eq!(
            handle.await,
            Err(TaskError::Failed {
                message: "aborted mid-merge".to_string()
            })
        );

        let stats = coord.counters.to_pool_stats();
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.tasks_cancelled, 0);
        join(coord.shutdown());
    }

    #[tokio::test]
    async fn test_progress_forwarded_before_result() {
        let (mut coord, mut events) = coordinator(WorkerPoolConfig::new(1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = submit(
            &mut coord,
            "progress",
            SubmitOptions::new().with_progress(move |p| sink.lock().unwrap().push(p)),
        );

        for _ in 0..3 {
            pump(&mut coord, &mut events).await;
        }
        assert_eq!(handle.await, Ok(json!("rendered")));
        assert_eq!(*seen.lock().unwrap(), vec![25, 75]);
        join(coord.shutdown());
    }

    #[tokio::test]
    async fn test_cancel_all_and_shutdown() {
        let (mut coord, mut events) = coordinator(WorkerPoolConfig::new(1));
        let running = submit(&mut coord, "hold", SubmitOptions::new());
        let queued = submit(&mut coord, "echo", SubmitOptions::new());

        coord.cancel_all();
        assert_eq!(queued.await, Err(TaskError::Cancelled));
        pump(&mut coord, &mut events).await;
        assert_eq!(running.await, Ok(json!("held")));

        let late = submit(&mut coord, "hold", SubmitOptions::new());
        let threads = coord.shutdown();
        assert_eq!(threads.len(), 1);
        join(threads);
        assert_eq!(late.await, Err(TaskError::PoolShutdown));
        assert_eq!(coord.status(), PoolStatus::default());
    }

    #[tokio::test]
    async fn test_handle_command_round_trip() {
        let (mut coord, _events) = coordinator(WorkerPoolConfig::new(2));

        let (reply, rx) = oneshot::channel();
        assert!(coord.handle_command(Command::Cancel {
            task_id: TaskId::new(),
            reply
        }));
        assert!(!rx.await.unwrap());

        let (reply, rx) = oneshot::channel();
        assert!(coord.handle_command(Command::Status { reply }));
        assert_eq!(rx.await.unwrap().worker_count, 0);

        let (reply, rx) = oneshot::channel();
        assert!(!coord.handle_command(Command::Shutdown { reply }));
        assert!(rx.await.unwrap().is_empty());
    }
}
