//! In-process task queue with priority insertion.
//!
//! Holds tasks that have been submitted but not yet dispatched to a worker.
//!
//! # Ordering
//!
//! - `Normal` and `Low` tasks append at the back (one FIFO class).
//! - `High` tasks are inserted behind any `High` tasks already at the head,
//!   so a burst of high-priority submissions keeps its own submission order
//!   while jumping everything else that is queued.
//!
//! # Depth limit
//!
//! The queue optionally carries a depth limit. It does not enforce the limit
//! itself: the coordinator checks [`TaskQueue::is_full`] and only rejects a
//! submission when no worker could take it either.

use std::collections::VecDeque;

use super::job::{Priority, Task, TaskId};

/// Ordered holding area for not-yet-dispatched tasks.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
    max_depth: Option<usize>,
}

impl TaskQueue {
    /// Creates an empty queue with an optional depth limit.
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            tasks: VecDeque::new(),
            max_depth,
        }
    }

    /// Inserts a task according to its priority.
    pub fn push(&mut self, task: Task) {
        if task.priority.is_high() {
            let position = self
                .tasks
                .iter()
                .take_while(|queued| queued.priority == Priority::High)
                .count();
            self.tasks.insert(position, task);
        } else {
            self.tasks.push_back(task);
        }
    }

    /// Puts a task back at the head, ahead of everything else.
    ///
    /// Used when a popped task could not be handed to its worker.
    pub fn push_front(&mut self, task: Task) {
        self.tasks.push_front(task);
    }

    /// Removes and returns the head of the queue.
    pub fn pop_front(&mut self) -> Option<Task> {
        self.tasks.pop_front()
    }

    /// Removes the task with the given id, wherever it sits.
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let index = self.tasks.iter().position(|task| task.id == id)?;
        self.tasks.remove(index)
    }

    /// Removes every queued task, in queue order.
    pub fn drain(&mut self) -> Vec<Task> {
        self.tasks.drain(..).collect()
    }

    /// Returns whether a task with the given id is queued.
    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|task| task.id == id)
    }

    /// Iterates over queued task ids in dispatch order.
    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.tasks.iter().map(|task| task.id)
    }

    /// Number of queued tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The configured depth limit, if any.
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }

    /// Returns whether the queue has reached its depth limit.
    pub fn is_full(&self) -> bool {
        self.max_depth
            .is_some_and(|limit| self.tasks.len() >= limit)
    }
}
