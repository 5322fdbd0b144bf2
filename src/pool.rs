//! Persistent worker pool and task dispatcher.
//!
//! A fixed set of threads spawned once per solver lifetime runs a
//! wait/dispatch loop keyed on the shared [`WorkCell`]. The coordinator
//! publishes a task, wakes everyone, and blocks until the range partitioner
//! reports completion (or, for the line search, until the search object
//! signals itself finished).
//!
//! A worker goes to sleep only when the published task is Idle, or when the
//! published `(generation, task)` pair equals the last pair it executed to
//! completion — the latter covers the window in which a worker finishes
//! early, the range is already exhausted, and the coordinator has not yet
//! reset the task to Idle. A plain "task != Idle" check would send that
//! worker straight back into the exhausted generation; comparing the full
//! discriminator closes the race without any per-dispatch reset barrier.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, error, trace};

use crate::linalg::{ExclusiveComputeRegion, NoopLimiter, ParallelismLimiter};
use crate::partition::{epoch32, IndexPartition};
use crate::task::{Task, WorkCell, WorkId};

/// Work the pool can hand to its owner, one claimed unit at a time.
pub trait TaskRunner: Send + Sync + 'static {
    /// Process one claimed index of a range task (linearize, quadratize,
    /// build, or roll out a shot).
    fn process_index(&self, task: Task, thread_id: usize, k: usize);

    /// Run the line-search worker body to completion.
    fn line_search_worker(&self, thread_id: usize);

    /// Instrumentation hook: a worker is about to execute the given
    /// published work unit. Default: nothing.
    fn on_task_started(&self, _id: WorkId, _thread_id: usize) {}
}

struct PoolShared<R> {
    runner: R,
    work: WorkCell,
    partition: IndexPartition,
    active: AtomicBool,
    wake_lock: Mutex<()>,
    wake_cv: Condvar,
    done_lock: Mutex<()>,
    done_cv: Condvar,
    wake_signals: AtomicUsize,
    n_threads: usize,
}

/// The worker pool. One per solver instance; all pool state lives inside,
/// so multiple independent solvers can coexist in one process.
pub struct WorkerPool<R: TaskRunner> {
    shared: Arc<PoolShared<R>>,
    limiter: Box<dyn ParallelismLimiter>,
    linalg_threads: usize,
    threads: Vec<JoinHandle<()>>,
}

impl<R: TaskRunner> WorkerPool<R> {
    /// Spawn `n_threads` persistent workers over the given runner, with no
    /// linear-algebra threading to control.
    pub fn start(n_threads: usize, runner: R) -> Self {
        Self::start_with_limiter(n_threads, runner, Box::new(NoopLimiter), 1)
    }

    /// Spawn `n_threads` persistent workers, bracketing every multi-index
    /// dispatch with an exclusive-compute region on `limiter`;
    /// `linalg_threads` is the count restored when a region ends.
    ///
    /// # Panics
    /// Panics if `n_threads == 0` or a worker thread cannot be spawned.
    pub fn start_with_limiter(
        n_threads: usize,
        runner: R,
        limiter: Box<dyn ParallelismLimiter>,
        linalg_threads: usize,
    ) -> Self {
        assert!(n_threads > 0, "worker pool needs at least one thread");
        let shared = Arc::new(PoolShared {
            runner,
            work: WorkCell::new(),
            partition: IndexPartition::new(),
            active: AtomicBool::new(true),
            wake_lock: Mutex::new(()),
            wake_cv: Condvar::new(),
            done_lock: Mutex::new(()),
            done_cv: Condvar::new(),
            wake_signals: AtomicUsize::new(0),
            n_threads,
        });
        let threads = (0..n_threads)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("slq-worker-{i}"))
                    .spawn(move || worker_loop(&shared, i))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self {
            shared,
            limiter,
            linalg_threads,
            threads,
        }
    }

    /// Number of worker threads. The coordinator's inline fast path uses
    /// thread id `n_threads()`, one past the workers.
    #[inline]
    pub fn n_threads(&self) -> usize {
        self.shared.n_threads
    }

    /// The runner shared with the workers.
    #[inline]
    pub fn runner(&self) -> &R {
        &self.shared.runner
    }

    /// Number of wake broadcasts issued so far (instrumentation; single-index
    /// dispatches must not add to it).
    pub fn wake_signals(&self) -> usize {
        self.shared.wake_signals.load(Ordering::Relaxed)
    }

    /// Dispatch a range task over `[first, last]` and block until every
    /// index has been processed.
    ///
    /// A single-index range runs inline on the calling thread with thread id
    /// `n_threads()` and never wakes the workers.
    pub fn dispatch_range(&self, task: Task, first: usize, last: usize) {
        debug_assert!(task.is_range_task(), "not a range task: {task:?}");
        if first == last {
            trace!(?task, index = first, "single-index fast path");
            self.shared
                .runner
                .process_index(task, self.shared.n_threads, first);
            return;
        }

        let _region = self.exclusive_region();
        self.shared
            .partition
            .reset(first, last, self.shared.work.next_generation());
        let id = self.publish_and_wake(task);
        debug!(generation = id.generation, ?task, first, last, "dispatched range");

        let mut guard = self.shared.done_lock.lock().expect("done lock poisoned");
        while !self.shared.partition.is_complete() {
            guard = self.shared.done_cv.wait(guard).expect("done lock poisoned");
        }
        drop(guard);
        self.set_idle();
        trace!(generation = id.generation, ?task, "range complete");
    }

    /// Enter the exclusive-compute region for this pool's linalg limiter.
    pub fn exclusive_region(&self) -> ExclusiveComputeRegion<'_> {
        ExclusiveComputeRegion::enter(self.limiter.as_ref(), self.linalg_threads)
    }

    /// Publish a task under a fresh generation and wake all workers.
    /// Used directly by the line-search coordinator; range dispatches go
    /// through [`dispatch_range`](Self::dispatch_range).
    pub fn publish_and_wake(&self, task: Task) -> WorkId {
        let id = self.shared.work.publish(task);
        self.shared.wake_signals.fetch_add(1, Ordering::Relaxed);
        let _guard = self.shared.wake_lock.lock().expect("wake lock poisoned");
        self.shared.wake_cv.notify_all();
        id
    }

    /// Reset the published task to Idle after a completed dispatch.
    pub fn set_idle(&self) {
        self.shared.work.set_idle();
    }

    /// Stop and join all workers. Idempotent; also runs on drop.
    ///
    /// # Panics
    /// Panics if a worker thread fails to join — a lifecycle fault the
    /// process cannot recover from.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        debug!("shutting down worker pool");
        self.shared.active.store(false, Ordering::Release);
        self.publish_and_wake(Task::Shutdown);
        for (i, handle) in self.threads.drain(..).enumerate() {
            if handle.join().is_err() {
                panic!("worker thread {i} failed to join cleanly");
            }
        }
        trace!("all workers joined");
    }
}

impl<R: TaskRunner> Drop for WorkerPool<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn should_sleep(current: WorkId, last_done: Option<WorkId>) -> bool {
    current.task() == Some(Task::Idle) || Some(current) == last_done
}

fn worker_loop<R: TaskRunner>(shared: &PoolShared<R>, thread_id: usize) {
    trace!(thread_id, "worker launched");
    let mut last_done: Option<WorkId> = None;

    while shared.active.load(Ordering::Acquire) {
        let mut current = shared.work.load();

        if should_sleep(current, last_done) {
            let mut guard = shared.wake_lock.lock().expect("wake lock poisoned");
            loop {
                current = shared.work.load();
                if !should_sleep(current, last_done) {
                    break;
                }
                guard = shared.wake_cv.wait(guard).expect("wake lock poisoned");
            }
            drop(guard);
        }

        if !shared.active.load(Ordering::Acquire) {
            break;
        }

        match current.task() {
            None => {
                // Logic fault: the published byte does not decode. Report
                // and idle rather than taking the pool down.
                error!(thread_id, byte = current.task_byte, "worker received unknown task");
                last_done = Some(current);
            }
            Some(Task::Idle) => {}
            Some(Task::Shutdown) => {
                trace!(thread_id, "worker shutting down");
                return;
            }
            Some(Task::LineSearch) => {
                shared.runner.on_task_started(current, thread_id);
                shared.runner.line_search_worker(thread_id);
                last_done = Some(current);
            }
            Some(_) => {
                shared.runner.on_task_started(current, thread_id);
                range_worker(shared, current, thread_id);
                last_done = Some(current);
            }
        }
    }
    trace!(thread_id, "worker exiting");
}

fn range_worker<R: TaskRunner>(shared: &PoolShared<R>, entered: WorkId, thread_id: usize) {
    loop {
        let claim = shared.partition.claim();
        match claim.index {
            Some(k) => {
                // A claim stamped with a newer epoch than the generation this
                // worker entered with belongs to a dispatch published while
                // the worker was descheduled; adopt that dispatch's task so
                // the index is still processed under the right phase body.
                let task = if claim.epoch == epoch32(entered.generation) {
                    entered.task()
                } else {
                    adopted_task(shared, claim.epoch)
                };
                match task {
                    Some(task) if task.is_range_task() => {
                        shared.runner.process_index(task, thread_id, k)
                    }
                    other => {
                        error!(thread_id, k, ?other, "claim resolved to a non-range task");
                    }
                }
                shared.partition.mark_done();
            }
            None => {
                if shared.partition.is_complete() {
                    let _guard = shared.done_lock.lock().expect("done lock poisoned");
                    shared.done_cv.notify_all();
                }
                return;
            }
        }
    }
}

/// Resolve the task of the dispatch a foreign-epoch claim belongs to.
///
/// The owning coordinator cannot proceed past that dispatch while this claim
/// is unprocessed, so the published work id must reach the claim's epoch; it
/// may trail it briefly when the claim landed between the partition reset and
/// the publish.
fn adopted_task<R: TaskRunner>(shared: &PoolShared<R>, claim_epoch: u64) -> Option<Task> {
    loop {
        let current = shared.work.load();
        if epoch32(current.generation) == claim_epoch {
            return current.task();
        }
        std::hint::spin_loop();
    }
}
