//! Worker registry: an arena of worker slots.
//!
//! Each slot is one logical position in the pool. A slot moves through an
//! explicit state machine:
//!
//! ```text
//!   Idle ──assign──▶ Busy(task) ──release──▶ Idle
//!    │                  │
//!    └──retire──▶ Replacing ◀──retire──┘
//!                    │
//!                    └──revive──▶ Idle
//! ```
//!
//! Retiring a slot bumps its generation, so events still in flight from the
//! dead worker can be told apart from events of its replacement.

use std::fmt;

use thiserror::Error;

use super::job::TaskId;

/// Errors raised by illegal slot operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("Slot {0} does not exist")]
    UnknownSlot(usize),

    #[error("Slot {slot} cannot go from {from} to {to}")]
    InvalidTransition {
        slot: usize,
        from: SlotState,
        to: SlotState,
    },
}

/// State of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Live worker waiting for a task.
    Idle,
    /// Live worker running the given task.
    Busy(TaskId),
    /// Worker is dead and no replacement is running yet.
    Replacing,
}

impl SlotState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: SlotState) -> bool {
        use SlotState::*;

        matches!(
            (self, target),
            (Idle, Busy(_)) | (Busy(_), Idle) | (Idle, Replacing) | (Busy(_), Replacing) | (Replacing, Idle)
        )
    }

    /// The task running in this slot, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::Busy(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Busy(id) => write!(f, "busy({id})"),
            Self::Replacing => write!(f, "replacing"),
        }
    }
}

#[derive(Debug)]
struct Slot<W> {
    generation: u64,
    state: SlotState,
    worker: Option<W>,
}

/// Arena of worker slots, indexed by slot number.
///
/// Generic over the worker handle so the state machine can be exercised
/// without spawning threads.
#[derive(Debug)]
pub struct WorkerRegistry<W> {
    slots: Vec<Slot<W>>,
    max_workers: usize,
}

impl<W> WorkerRegistry<W> {
    /// Creates an empty registry that will hold at most `max_workers` slots.
    pub fn new(max_workers: usize) -> Self {
        Self {
            slots: Vec::with_capacity(max_workers),
            max_workers,
        }
    }

    /// Configured slot ceiling.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of slots, live or being replaced.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns whether no slot was ever created.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns whether another slot may be created.
    pub fn has_capacity(&self) -> bool {
        self.slots.len() < self.max_workers
    }

    /// Index the next inserted slot will get.
    pub fn next_slot(&self) -> usize {
        self.slots.len()
    }

    /// Adds a new idle slot holding `worker` and returns its index.
    ///
    /// Returns the worker back when the registry is at capacity.
    pub fn insert(&mut self, worker: W) -> Result<usize, W> {
        if !self.has_capacity() {
            return Err(worker);
        }
        self.slots.push(Slot {
            generation: 0,
            state: SlotState::Idle,
            worker: Some(worker),
        });
        Ok(self.slots.len() - 1)
    }

    /// Current state of a slot.
    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.slots.get(slot).map(|s| s.state)
    }

    /// Current generation of a slot.
    pub fn generation(&self, slot: usize) -> Option<u64> {
        self.slots.get(slot).map(|s| s.generation)
    }

    /// Returns whether `generation` is the live generation of `slot`.
    pub fn is_current(&self, slot: usize, generation: u64) -> bool {
        self.slots
            .get(slot)
            .is_some_and(|s| s.generation == generation && s.worker.is_some())
    }

    /// The worker occupying a slot, if it is live.
    pub fn worker(&self, slot: usize) -> Option<&W> {
        self.slots.get(slot).and_then(|s| s.worker.as_ref())
    }

    /// The task currently running in a slot.
    pub fn task_on(&self, slot: usize) -> Option<TaskId> {
        self.state(slot).and_then(|state| state.task_id())
    }

    /// First idle slot, if any.
    pub fn find_idle(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.state == SlotState::Idle && s.worker.is_some())
    }

    /// First slot still waiting for a replacement worker.
    pub fn find_replacing(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.state == SlotState::Replacing)
    }

    /// Number of slots with a live worker.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.worker.is_some()).count()
    }

    /// Number of live idle workers.
    pub fn idle_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Idle && s.worker.is_some())
            .count()
    }

    /// Number of busy workers.
    pub fn busy_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Busy(_)))
            .count()
    }

    /// Iterates over `(slot, task)` for every busy slot.
    pub fn busy_slots(&self) -> impl Iterator<Item = (usize, TaskId)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, s)| s.state.task_id().map(|id| (index, id)))
    }

    /// Marks an idle slot busy with `task_id`.
    pub fn assign(&mut self, slot: usize, task_id: TaskId) -> Result<(), SlotError> {
        self.transition(slot, SlotState::Busy(task_id))
    }

    /// Marks a busy slot idle again.
    pub fn release(&mut self, slot: usize) -> Result<(), SlotError> {
        self.transition(slot, SlotState::Idle)
    }

    /// Takes the worker out of a slot and marks it as awaiting replacement.
    ///
    /// Bumps the slot generation.
    pub fn retire(&mut self, slot: usize) -> Result<Option<W>, SlotError> {
        self.transition(slot, SlotState::Replacing)?;
        let entry = &mut self.slots[slot];
        entry.generation += 1;
        Ok(entry.worker.take())
    }

    /// Installs a replacement worker in a retired slot.
    pub fn revive(&mut self, slot: usize, worker: W) -> Result<(), SlotError> {
        self.transition(slot, SlotState::Idle)?;
        self.slots[slot].worker = Some(worker);
        Ok(())
    }

    /// Removes every worker, leaving the registry empty.
    pub fn drain(&mut self) -> Vec<W> {
        self.slots.drain(..).filter_map(|s| s.worker).collect()
    }

    fn transition(&mut self, slot: usize, target: SlotState) -> Result<(), SlotError> {
        let entry = self.slots.get_mut(slot).ok_or(SlotError::UnknownSlot(slot))?;
        if !entry.state.can_transition_to(target) {
            return Err(SlotError::InvalidTransition {
                slot,
                from: entry.state,
                to: target,
            });
        }
        entry.state = target;
        Ok(())
    }
}
