//! Dispatch-protocol properties observed through the public solver surface,
//! using counting collaborator stubs.

use std::collections::HashMap;
use std::sync::Mutex;

use nalgebra::{DMatrix, DVector};
use slq_mp::lq::{StageExpansion, TerminalExpansion};
use slq_mp::traits::{CostFunction, SystemModel};
use slq_mp::{Iterate, Result, SettingsBuilder, SlqSolver};

/// Records every `(stage, thread_id)` pair each collaborator method sees.
struct CountingModel {
    linearize_calls: Mutex<Vec<(usize, usize)>>,
    step_calls: Mutex<Vec<(usize, usize)>>,
}

impl CountingModel {
    fn new() -> Self {
        Self {
            linearize_calls: Mutex::new(Vec::new()),
            step_calls: Mutex::new(Vec::new()),
        }
    }

    fn linearize_counts(&self) -> HashMap<usize, usize> {
        let mut counts = HashMap::new();
        for &(k, _) in self.linearize_calls.lock().unwrap().iter() {
            *counts.entry(k).or_insert(0) += 1;
        }
        counts
    }
}

impl SystemModel for CountingModel {
    fn state_dim(&self) -> usize {
        2
    }

    fn control_dim(&self) -> usize {
        1
    }

    fn step(
        &self,
        thread_id: usize,
        k: usize,
        x: &DVector<f64>,
        _u: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        self.step_calls.lock().unwrap().push((k, thread_id));
        Ok(x.clone())
    }

    fn linearize(
        &self,
        thread_id: usize,
        k: usize,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
        a: &mut DMatrix<f64>,
        _b: &mut DMatrix<f64>,
    ) {
        self.linearize_calls.lock().unwrap().push((k, thread_id));
        a.fill_with_identity();
    }
}

struct CountingCost {
    quadratize_calls: Mutex<Vec<(usize, usize)>>,
}

impl CountingCost {
    fn new() -> Self {
        Self {
            quadratize_calls: Mutex::new(Vec::new()),
        }
    }
}

impl CostFunction for CountingCost {
    fn stage_cost(&self, _k: usize, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        x.norm_squared() + u.norm_squared()
    }

    fn terminal_cost(&self, x: &DVector<f64>) -> f64 {
        x.norm_squared()
    }

    fn quadratize(
        &self,
        thread_id: usize,
        k: usize,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
        out: &mut StageExpansion,
    ) {
        self.quadratize_calls.lock().unwrap().push((k, thread_id));
        out.q = 1.0;
    }

    fn quadratize_terminal(&self, _x: &DVector<f64>, out: &mut TerminalExpansion) {
        out.q = 1.0;
    }
}

fn counting_solver(horizon: usize, n_threads: usize) -> SlqSolver<CountingModel, CountingCost> {
    let settings = SettingsBuilder::new().n_threads(n_threads).build().unwrap();
    let initial = Iterate::constant(DVector::from_vec(vec![1.0, 0.0]), 1, horizon);
    SlqSolver::new(CountingModel::new(), CountingCost::new(), settings, initial).unwrap()
}

#[test]
fn linearization_processes_every_index_exactly_once() {
    let solver = counting_solver(200, 4);
    solver.dispatch_linearization(0, 199);
    let counts = solver.backend().model().linearize_counts();
    for k in 0..200 {
        assert_eq!(counts.get(&k), Some(&1), "index {k}");
    }
    solver.shutdown();
}

#[test]
fn repeated_dispatches_each_process_the_range_once() {
    let solver = counting_solver(64, 4);
    for _ in 0..25 {
        solver.dispatch_linearization(0, 63);
    }
    let counts = solver.backend().model().linearize_counts();
    for k in 0..64 {
        assert_eq!(counts.get(&k), Some(&25), "index {k}");
    }
    solver.shutdown();
}

#[test]
fn cost_quadratization_covers_the_range() {
    let solver = counting_solver(50, 3);
    solver.dispatch_cost_quadratization(0, 49);
    let calls = solver
        .backend()
        .cost()
        .quadratize_calls
        .lock()
        .unwrap()
        .clone();
    let mut seen: Vec<usize> = calls.iter().map(|&(k, _)| k).collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..50).collect::<Vec<_>>());
    solver.shutdown();
}

#[test]
fn single_index_dispatch_runs_inline_without_waking_workers() {
    let solver = counting_solver(20, 4);
    solver.dispatch_linearization(7, 7);
    assert_eq!(solver.wake_signals(), 0, "no wake broadcast expected");
    let calls = solver
        .backend()
        .model()
        .linearize_calls
        .lock()
        .unwrap()
        .clone();
    // Processed exactly once, on the coordinator's thread id (one past the
    // worker ids).
    assert_eq!(calls, vec![(7, 4)]);
    solver.shutdown();
}

#[test]
fn single_index_output_matches_multi_threaded_path() {
    let solver = counting_solver(10, 2);
    solver.dispatch_linearization(5, 5);
    let inline_stage = solver.backend().lq().stage(5).a.clone();
    solver.dispatch_linearization(0, 9);
    assert_eq!(solver.backend().lq().stage(5).a, inline_stage);
    solver.shutdown();
}

struct SharedLimiter {
    current: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    restrictions: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl slq_mp::linalg::ParallelismLimiter for SharedLimiter {
    fn set_threads(&self, n: usize) {
        use std::sync::atomic::Ordering;
        self.current.store(n, Ordering::SeqCst);
        if n == 1 {
            self.restrictions.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn exclusive_region_brackets_multi_index_dispatches_only() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let current = Arc::new(AtomicUsize::new(0));
    let restrictions = Arc::new(AtomicUsize::new(0));
    let limiter = SharedLimiter {
        current: Arc::clone(&current),
        restrictions: Arc::clone(&restrictions),
    };

    let mut settings = SettingsBuilder::new().n_threads(2).build().unwrap();
    settings.n_threads_linalg = 6;
    let initial = Iterate::constant(DVector::from_vec(vec![1.0, 0.0]), 1, 20);
    let solver = SlqSolver::with_limiter(
        CountingModel::new(),
        CountingCost::new(),
        settings,
        initial,
        Box::new(limiter),
    )
    .unwrap();

    solver.dispatch_linearization(0, 19);
    assert_eq!(restrictions.load(Ordering::SeqCst), 1, "one region entered");
    assert_eq!(current.load(Ordering::SeqCst), 6, "configured count restored");

    solver.dispatch_linearization(4, 4);
    assert_eq!(
        restrictions.load(Ordering::SeqCst),
        1,
        "single-index dispatch must not enter the region"
    );

    let alpha = solver.run_line_search();
    assert_eq!(alpha, 0.0, "zero direction cannot improve the merit");
    assert_eq!(
        restrictions.load(Ordering::SeqCst),
        2,
        "line search brackets itself in the region"
    );
    assert_eq!(current.load(Ordering::SeqCst), 6);
    solver.shutdown();
}

#[test]
fn shutdown_terminates_with_phase_history() {
    let solver = counting_solver(100, 8);
    solver.dispatch_linearization(0, 99);
    solver.dispatch_cost_quadratization(0, 99);
    solver.dispatch_lq_build(0, 99);
    solver.dispatch_shot_rollout(0, 99).unwrap();
    solver.shutdown();
}

#[test]
fn shutdown_immediately_after_start() {
    let solver = counting_solver(10, 16);
    solver.shutdown();
}
