//! Parallel backtracking line search.
//!
//! Workers concurrently evaluate trial step sizes drawn from a geometric
//! sequence indexed by exponent; the search must return exactly the step a
//! sequential backtracking loop (try exponents 0, 1, 2, … and stop at the
//! first improvement) would return, for every evaluation order.
//!
//! The protocol: an atomic counter hands out exponents; a per-exponent
//! processed flag array, the best candidate record, and the previous
//! iterate's merit live under one mutex. A candidate is recorded iff its
//! merit improves on the previous iterate's merit (NaN rejected) *and* its
//! exponent is smaller than the recorded one — the second guard is what
//! keeps a late-arriving larger-exponent improvement from displacing an
//! already-recorded larger step. The search finishes when every exponent
//! strictly below the recorded best has been processed: a larger step could
//! only still win if one of them were outstanding.
//!
//! Cancellation is relaxed on purpose: a worker checks the finished flag
//! only when claiming, so an in-flight trial runs to completion and its late
//! write is rejected under the lock. The wasted evaluation is harmless.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use tracing::{debug, trace};

/// A recorded improving candidate.
#[derive(Clone, Debug)]
pub struct Accepted<C> {
    pub exponent: usize,
    pub merit: f64,
    pub payload: C,
}

#[derive(Debug)]
struct SearchState<C> {
    processed: Vec<bool>,
    /// Smallest improving exponent seen so far; `max_exponents` while none.
    best_exponent: usize,
    previous_merit: f64,
    best: Option<Accepted<C>>,
}

/// Reusable parallel backtracking search over `max_exponents` trial steps.
///
/// Generic over the candidate payload `C` (the backend stores whole trial
/// trajectories; tests store markers).
#[derive(Debug)]
pub struct ParallelLineSearch<C> {
    max_exponents: usize,
    /// `(search epoch << 32) | next exponent`, advanced by one per claim.
    /// The epoch stamp lets a worker that straddled a reset recognize its
    /// claim as belonging to an already-finished search.
    claims: AtomicU64,
    best_found: AtomicBool,
    state: Mutex<SearchState<C>>,
    done_lock: Mutex<()>,
    done_cv: Condvar,
}

impl<C> ParallelLineSearch<C> {
    pub fn new(max_exponents: usize) -> Self {
        assert!(max_exponents > 0, "need at least one trial exponent");
        Self {
            max_exponents,
            claims: AtomicU64::new(0),
            best_found: AtomicBool::new(true),
            state: Mutex::new(SearchState {
                processed: vec![false; max_exponents],
                best_exponent: max_exponents,
                previous_merit: f64::INFINITY,
                best: None,
            }),
            done_lock: Mutex::new(()),
            done_cv: Condvar::new(),
        }
    }

    #[inline]
    pub fn max_exponents(&self) -> usize {
        self.max_exponents
    }

    #[inline]
    fn current_epoch(&self) -> u64 {
        self.claims.load(Ordering::Acquire) >> 32
    }

    fn claim(&self) -> (u64, usize) {
        let bits = self.claims.fetch_add(1, Ordering::AcqRel);
        (bits >> 32, (bits & 0xffff_ffff) as usize)
    }

    /// Arm the search against the previous iterate's merit. Coordinator
    /// only, while no search is running.
    pub fn reset(&self, previous_merit: f64) {
        let mut st = self.state.lock().expect("line-search state poisoned");
        st.processed.iter_mut().for_each(|p| *p = false);
        st.best_exponent = self.max_exponents;
        st.previous_merit = previous_merit;
        st.best = None;
        self.best_found.store(false, Ordering::Release);
        // Bump the epoch last: a claim under the new epoch must imply the
        // search state it commits against is the re-armed one.
        let next_epoch = (self.claims.load(Ordering::Relaxed) >> 32) + 1;
        self.claims.store(next_epoch << 32, Ordering::Release);
    }

    /// Worker body: claim exponents and evaluate them until the search
    /// finishes or the exponents run out.
    ///
    /// `evaluate(exponent)` returns the candidate's merit and payload.
    pub fn worker_loop<F>(&self, evaluate: F)
    where
        F: Fn(usize) -> (f64, C),
    {
        loop {
            let (epoch, exponent) = self.claim();
            if exponent >= self.max_exponents || self.best_found.load(Ordering::Acquire) {
                return;
            }

            let (merit, payload) = evaluate(exponent);
            trace!(exponent, merit, "line-search trial evaluated");

            let mut st = self.state.lock().expect("line-search state poisoned");
            if epoch != self.current_epoch() {
                // Leftover claim from a search that has since been re-armed;
                // its own search is long decided.
                return;
            }
            let improves =
                !merit.is_nan() && merit < st.previous_merit && exponent < st.best_exponent;
            if improves {
                // A finished search's record is final; never alter it.
                if self.best_found.load(Ordering::Acquire) {
                    return;
                }
                debug!(exponent, merit, "new best line-search candidate");
                st.best_exponent = exponent;
                st.best = Some(Accepted {
                    exponent,
                    merit,
                    payload,
                });
            }
            st.processed[exponent] = true;

            // All exponents below the recorded best are in: no larger step
            // can still change the outcome, whatever is in flight.
            let bound = st.best_exponent.min(self.max_exponents);
            if st.processed[..bound].iter().all(|&p| p) {
                self.best_found.store(true, Ordering::Release);
                drop(st);
                let _guard = self.done_lock.lock().expect("line-search done lock poisoned");
                self.done_cv.notify_all();
            }
        }
    }

    /// Block until the search has finished. Coordinator only.
    pub fn wait_finished(&self) {
        let mut guard = self.done_lock.lock().expect("line-search done lock poisoned");
        while !self.best_found.load(Ordering::Acquire) {
            guard = self
                .done_cv
                .wait(guard)
                .expect("line-search done lock poisoned");
        }
    }

    /// Take the accepted candidate, leaving the search empty. `None` when no
    /// exponent improved on the previous merit (step size zero).
    pub fn take_accepted(&self) -> Option<Accepted<C>> {
        self.state
            .lock()
            .expect("line-search state poisoned")
            .best
            .take()
    }
}
