//! Public solver surface: lifecycle, phase dispatch, and the outer
//! iteration loop.
//!
//! [`SlqSolver`] owns the worker pool and routes each per-iteration phase
//! through it; the linear-quadratic backward pass stays external behind the
//! [`LqSolver`] seam. One iteration is: roll out shooting segments (defects)
//! → linearize dynamics → quadratize cost → backward solve → parallel
//! backtracking line search → commit.

use tracing::{debug, info};

use crate::backend::SolverBackend;
use crate::error::Result;
use crate::linalg::ParallelismLimiter;
use crate::pool::WorkerPool;
use crate::settings::Settings;
use crate::task::Task;
use crate::traits::{CostFunction, LqSolver, SystemModel};
use crate::trajectory::Iterate;
use crate::utils::array_diff_norm;

/// Outcome of one outer iteration.
#[derive(Clone, Copy, Debug)]
pub struct IterationSummary {
    /// Accepted line-search step size (zero when no candidate improved).
    pub step_size: f64,
    /// Merit of the iterate after the line search.
    pub merit: f64,
    /// Summed L2 norm of the control update against the previous iterate.
    pub control_update_norm: f64,
    /// Summed L2 norm of the state update against the previous iterate.
    pub state_update_norm: f64,
    /// Summed feedforward norm of the direction this iteration stepped
    /// along.
    pub direction_norm: f64,
}

/// Report of a full [`SlqSolver::solve`] run.
#[derive(Clone, Debug)]
pub struct SolveReport {
    pub iterations: Vec<IterationSummary>,
    pub converged: bool,
}

/// Multi-threaded sequential linear-quadratic solver.
pub struct SlqSolver<M, C>
where
    M: SystemModel + 'static,
    C: CostFunction + 'static,
{
    pool: WorkerPool<SolverBackend<M, C>>,
}

impl<M, C> SlqSolver<M, C>
where
    M: SystemModel + 'static,
    C: CostFunction + 'static,
{
    /// Start a solver (and its worker pool) around an initial-guess iterate.
    pub fn new(model: M, cost: C, settings: Settings, initial: Iterate) -> Result<Self> {
        settings.validate()?;
        let n_threads = settings.n_threads;
        let backend = SolverBackend::new(model, cost, settings, initial)?;
        Ok(Self {
            pool: WorkerPool::start(n_threads, backend),
        })
    }

    /// Like [`new`](Self::new), with a linear-algebra limiter the dispatcher
    /// toggles around every multi-index phase (restoring
    /// `settings.n_threads_linalg` afterwards).
    pub fn with_limiter(
        model: M,
        cost: C,
        settings: Settings,
        initial: Iterate,
        limiter: Box<dyn ParallelismLimiter>,
    ) -> Result<Self> {
        settings.validate()?;
        let n_threads = settings.n_threads;
        let linalg_threads = settings.n_threads_linalg;
        let backend = SolverBackend::new(model, cost, settings, initial)?;
        Ok(Self {
            pool: WorkerPool::start_with_limiter(n_threads, backend, limiter, linalg_threads),
        })
    }

    /// The shared backend state.
    #[inline]
    pub fn backend(&self) -> &SolverBackend<M, C> {
        self.pool.runner()
    }

    /// Number of stages `K`.
    pub fn horizon(&self) -> usize {
        self.backend().horizon()
    }

    /// Snapshot of the current iterate.
    pub fn iterate(&self) -> Iterate {
        self.backend().read_iterate().clone()
    }

    /// Wake broadcasts issued so far (instrumentation).
    pub fn wake_signals(&self) -> usize {
        self.pool.wake_signals()
    }

    /// Linearize the dynamics over the backward index range
    /// `[first, last]`.
    pub fn dispatch_linearization(&self, first: usize, last: usize) {
        self.pool.dispatch_range(Task::LinearizeDynamics, first, last);
    }

    /// Quadratize the cost over `[first, last]`, including the terminal
    /// expansion.
    pub fn dispatch_cost_quadratization(&self, first: usize, last: usize) {
        self.backend().initialize_terminal_cost();
        self.pool.dispatch_range(Task::ComputeCost, first, last);
    }

    /// Build the full LQ problem (cost and dynamics) over `[first, last]`
    /// in a single fused phase.
    pub fn dispatch_lq_build(&self, first: usize, last: usize) {
        self.backend().initialize_terminal_cost();
        self.pool.dispatch_range(Task::BuildLqProblem, first, last);
    }

    /// Roll out the shooting segments whose starts fall in `[first, last]`
    /// and record their defects. Surfaces the first integration failure.
    pub fn dispatch_shot_rollout(&self, first: usize, last: usize) -> Result<()> {
        self.pool.dispatch_range(Task::RolloutShots, first, last);
        self.backend().take_rollout_error()
    }

    /// Run the parallel backtracking line search along the installed update
    /// direction and commit the winner. Returns the accepted step size
    /// (zero when no candidate improved on the current iterate).
    pub fn run_line_search(&self) -> f64 {
        let backend = self.backend();
        let _region = self.pool.exclusive_region();
        let previous_merit = backend.prepare_line_search();
        debug!(previous_merit, "starting parallel line search");
        self.pool.publish_and_wake(Task::LineSearch);
        backend.search().wait_finished();
        self.pool.set_idle();
        let (step_size, merit) = backend.commit_line_search();
        debug!(step_size, merit, "line search finished");
        step_size
    }

    /// One full outer iteration against the given backward solver.
    pub fn run_iteration(&self, lq_solver: &dyn LqSolver) -> Result<IterationSummary> {
        let backend = self.backend();
        let last = self.horizon() - 1;

        self.dispatch_shot_rollout(0, last)?;
        self.dispatch_linearization(0, last);
        self.dispatch_cost_quadratization(0, last);

        let direction = {
            let iterate = backend.read_iterate();
            lq_solver.solve(backend.lq(), &iterate)?
        };
        let direction_norm = direction.control_update_norm();
        backend.set_direction(direction);

        let previous = backend.read_iterate().clone();
        let step_size = self.run_line_search();
        let merit = backend.current_merit();
        let current = backend.read_iterate();

        let summary = IterationSummary {
            step_size,
            merit,
            control_update_norm: array_diff_norm(&previous.u, &current.u),
            state_update_norm: array_diff_norm(&previous.x, &current.x),
            direction_norm,
        };
        debug!(?summary, "iteration complete");
        Ok(summary)
    }

    /// Iterate until the control update falls below the configured
    /// tolerance, the line search stalls, or the iteration budget runs out.
    pub fn solve(&self, lq_solver: &dyn LqSolver) -> Result<SolveReport> {
        let settings = self.backend().settings().clone();
        let mut iterations = Vec::new();
        let mut converged = false;
        for i in 0..settings.max_iterations {
            let summary = self.run_iteration(lq_solver)?;
            let stalled = summary.step_size == 0.0;
            let small_update = summary.control_update_norm <= settings.update_norm_tolerance;
            iterations.push(summary);
            if stalled || small_update {
                info!(
                    iteration = i,
                    stalled, small_update, "solver terminated"
                );
                converged = small_update || summary.direction_norm <= settings.update_norm_tolerance;
                break;
            }
        }
        Ok(SolveReport {
            iterations,
            converged,
        })
    }

    /// Stop and join the worker pool. Also happens on drop; calling it
    /// explicitly surfaces join panics at a predictable place.
    pub fn shutdown(mut self) {
        self.pool.shutdown();
    }
}
