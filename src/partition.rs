//! Atomic work partitioning over a contiguous backward index range.
//!
//! Any number of workers pull indices from `[first, last]` until exhausted.
//! Claims run backward (from `last` down to `first`) because the backward
//! optimal-control recursion that later consumes the per-index data traverses
//! them in that order; pulling opportunistically rather than pre-splitting
//! the range load-balances heterogeneous per-index cost automatically.
//!
//! The claim counter carries the dispatch epoch in its upper 32 bits, so a
//! claim is atomically stamped with the generation it belongs to. A worker
//! that was descheduled across a phase boundary and claims from a re-armed
//! partition can therefore tell — from the claim itself — that the index
//! belongs to a newer generation than the one it entered with.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const EPOCH_MASK: u64 = 0xffff_ffff;

/// Truncate a dispatch generation to the partition's 32-bit epoch space.
#[inline]
pub fn epoch32(generation: u64) -> u64 {
    generation & EPOCH_MASK
}

/// One claim from the partition: the epoch it was issued under and the
/// backward index, or `None` once the range is exhausted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Claim {
    pub epoch: u64,
    pub index: Option<usize>,
}

/// Shared claim/completion bookkeeping for one dispatched phase.
///
/// `reset` is only called by the coordinator between phases; the remaining
/// operations are safe under arbitrary concurrency.
pub struct IndexPartition {
    /// `(epoch << 32) | taken`, advanced by one per claim.
    claims: AtomicU64,
    completed: AtomicUsize,
    first: AtomicUsize,
    last: AtomicUsize,
}

impl IndexPartition {
    pub fn new() -> Self {
        Self {
            claims: AtomicU64::new(0),
            completed: AtomicUsize::new(1),
            first: AtomicUsize::new(0),
            last: AtomicUsize::new(0),
        }
    }

    /// Arm the partition for a new range under the given dispatch
    /// generation.
    ///
    /// # Panics
    /// Panics if `first > last`.
    pub fn reset(&self, first: usize, last: usize, generation: u64) {
        assert!(first <= last, "invalid index range [{first}, {last}]");
        self.first.store(first, Ordering::Relaxed);
        self.last.store(last, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.claims
            .store(epoch32(generation) << 32, Ordering::Release);
    }

    /// Number of indices in the armed range (never zero: the range always
    /// covers at least `first == last`).
    #[inline]
    pub fn range_len(&self) -> usize {
        self.last.load(Ordering::Relaxed) - self.first.load(Ordering::Relaxed) + 1
    }

    /// Claim the next backward index, stamped with the epoch it belongs to.
    pub fn claim(&self) -> Claim {
        let bits = self.claims.fetch_add(1, Ordering::AcqRel);
        let epoch = bits >> 32;
        let offset = (bits & EPOCH_MASK) as usize;
        let first = self.first.load(Ordering::Relaxed);
        let last = self.last.load(Ordering::Relaxed);
        let index = if offset > last - first {
            None
        } else {
            Some(last - offset)
        };
        Claim { epoch, index }
    }

    /// Record that one claimed index has been fully processed.
    pub fn mark_done(&self) {
        self.completed.fetch_add(1, Ordering::AcqRel);
    }

    /// True once every index in the range has been marked done.
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire) >= self.range_len()
    }
}

impl Default for IndexPartition {
    fn default() -> Self {
        Self::new()
    }
}
