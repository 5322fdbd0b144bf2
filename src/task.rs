//! The dispatch discriminator shared between the coordinator and workers.
//!
//! A unit of dispatched work is identified by the pair `(generation, task)`:
//! the task tells a worker *what* to do, the generation tells it *whether it
//! has already done it*. Publishing bumps the generation, so a pair is never
//! reused and a worker comparing its last finished [`WorkId`] against the
//! published one can always distinguish fresh work from its own leftovers.
//! The pair is packed into a single `AtomicU64` so both halves are read and
//! written in one load/store.

use std::sync::atomic::{AtomicU64, Ordering};

/// What the workers are currently asked to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Task {
    /// Nothing; workers sleep.
    Idle = 0,
    /// Fill the state/control sensitivity matrices for each claimed stage.
    LinearizeDynamics = 1,
    /// Fill the quadratic cost expansion for each claimed stage.
    ComputeCost = 2,
    /// Both of the above in one claim.
    BuildLqProblem = 3,
    /// Roll out shooting segments and record boundary defects.
    RolloutShots = 4,
    /// Evaluate backtracking line-search candidates.
    LineSearch = 5,
    /// Terminate the worker loop.
    Shutdown = 6,
}

impl Task {
    /// Decode a task byte. The discriminator crosses the atomic as a packed
    /// integer, so the decode is fallible; an unknown byte is a logic fault
    /// the caller reports rather than panics on.
    pub fn from_byte(byte: u8) -> Option<Task> {
        match byte {
            0 => Some(Task::Idle),
            1 => Some(Task::LinearizeDynamics),
            2 => Some(Task::ComputeCost),
            3 => Some(Task::BuildLqProblem),
            4 => Some(Task::RolloutShots),
            5 => Some(Task::LineSearch),
            6 => Some(Task::Shutdown),
            _ => None,
        }
    }

    /// Whether this task is executed by claiming indices from the range
    /// partitioner (as opposed to the line search's own exponent claims).
    pub fn is_range_task(self) -> bool {
        matches!(
            self,
            Task::LinearizeDynamics | Task::ComputeCost | Task::BuildLqProblem | Task::RolloutShots
        )
    }
}

/// One published unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkId {
    pub generation: u64,
    pub task_byte: u8,
}

impl WorkId {
    const IDLE: WorkId = WorkId {
        generation: 0,
        task_byte: Task::Idle as u8,
    };

    /// Decode the task half; `None` for an unrecognized byte.
    pub fn task(self) -> Option<Task> {
        Task::from_byte(self.task_byte)
    }

    #[inline]
    fn pack(self) -> u64 {
        (self.generation << 8) | u64::from(self.task_byte)
    }

    #[inline]
    fn unpack(bits: u64) -> WorkId {
        WorkId {
            generation: bits >> 8,
            task_byte: (bits & 0xff) as u8,
        }
    }
}

/// Atomic cell holding the currently published [`WorkId`].
///
/// Only the coordinator stores; workers load. The generation counter lives
/// inside the cell so that `publish` is the single place it advances.
pub struct WorkCell {
    bits: AtomicU64,
}

impl WorkCell {
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(WorkId::IDLE.pack()),
        }
    }

    /// Currently published work.
    pub fn load(&self) -> WorkId {
        WorkId::unpack(self.bits.load(Ordering::Acquire))
    }

    /// The generation the next `publish` will use. Meaningful only on the
    /// coordinating thread, which is the sole publisher.
    pub fn next_generation(&self) -> u64 {
        self.load().generation + 1
    }

    /// Publish a new task under the next generation and return its id.
    pub fn publish(&self, task: Task) -> WorkId {
        let current = self.load();
        let next = WorkId {
            generation: current.generation + 1,
            task_byte: task as u8,
        };
        self.bits.store(next.pack(), Ordering::Release);
        next
    }

    /// Reset the task half to [`Task::Idle`], keeping the generation.
    pub fn set_idle(&self) {
        let current = self.load();
        let idle = WorkId {
            generation: current.generation,
            task_byte: Task::Idle as u8,
        };
        self.bits.store(idle.pack(), Ordering::Release);
    }
}

impl Default for WorkCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_round_trip() {
        let id = WorkId {
            generation: 12345,
            task_byte: Task::RolloutShots as u8,
        };
        assert_eq!(WorkId::unpack(id.pack()), id);
    }

    #[test]
    fn publish_bumps_generation() {
        let cell = WorkCell::new();
        let a = cell.publish(Task::LinearizeDynamics);
        let b = cell.publish(Task::LinearizeDynamics);
        assert_eq!(a.task(), Some(Task::LinearizeDynamics));
        assert_eq!(b.generation, a.generation + 1);
        assert_ne!(a, b);
    }

    #[test]
    fn set_idle_keeps_generation() {
        let cell = WorkCell::new();
        let published = cell.publish(Task::ComputeCost);
        cell.set_idle();
        let idle = cell.load();
        assert_eq!(idle.task(), Some(Task::Idle));
        assert_eq!(idle.generation, published.generation);
    }

    #[test]
    fn unknown_byte_decodes_to_none() {
        assert_eq!(Task::from_byte(200), None);
        let bogus = WorkId {
            generation: 1,
            task_byte: 200,
        };
        assert_eq!(bogus.task(), None);
    }

    #[test]
    fn range_task_classification() {
        assert!(Task::LinearizeDynamics.is_range_task());
        assert!(Task::RolloutShots.is_range_task());
        assert!(!Task::LineSearch.is_range_task());
        assert!(!Task::Idle.is_range_task());
        assert!(!Task::Shutdown.is_range_task());
    }
}
