//! Phase-worker bodies: the glue between claimed indices and the external
//! collaborators.
//!
//! The backend owns every piece of shared solver state the workers touch.
//! During a dispatched phase, workers read the iterate through a shared lock
//! and write only the slot belonging to their claimed index (an LQ stage, a
//! run of shot-state slots); the coordinator mutates the iterate wholesale
//! only between phases. Rollout failures are parked in a first-error slot
//! and surfaced from the dispatch that caused them.

use std::sync::{Mutex, RwLock, RwLockReadGuard};

use tracing::{error, trace};

use crate::error::{Result, SolverError};
use crate::linesearch::ParallelLineSearch;
use crate::lq::{LqProblem, UpdateDirection};
use crate::pool::TaskRunner;
use crate::rollout::{
    compute_defect, rollout_multiple_shooting, rollout_segment, rollout_single_shooting,
    segment_end, Trial,
};
use crate::settings::{Algorithm, Settings};
use crate::task::Task;
use crate::traits::{CostFunction, SystemModel};
use crate::trajectory::{Iterate, ShotStates};
use crate::utils::is_shot_start;

/// Shared solver state plus the phase-worker bodies.
///
/// Lives inside the worker pool as its [`TaskRunner`]; the coordinator
/// reaches it through the pool.
#[derive(Debug)]
pub struct SolverBackend<M, C> {
    settings: Settings,
    model: M,
    cost: C,
    iterate: RwLock<Iterate>,
    shot_states: ShotStates,
    lq: LqProblem,
    direction: RwLock<UpdateDirection>,
    search: ParallelLineSearch<Trial>,
    rollout_error: Mutex<Option<SolverError>>,
}

impl<M: SystemModel, C: CostFunction> SolverBackend<M, C> {
    /// Build the backend around an initial-guess iterate.
    ///
    /// The settings must already be validated; dimensional mismatches
    /// between the guess and the model are configuration errors.
    pub fn new(model: M, cost: C, settings: Settings, initial: Iterate) -> Result<Self> {
        if initial.state_dim() != model.state_dim() {
            return Err(SolverError::config(format!(
                "initial guess state dim {} != model state dim {}",
                initial.state_dim(),
                model.state_dim()
            )));
        }
        if initial.control_dim() != model.control_dim() {
            return Err(SolverError::config(format!(
                "initial guess control dim {} != model control dim {}",
                initial.control_dim(),
                model.control_dim()
            )));
        }
        let horizon = initial.horizon();
        if horizon == 0 {
            return Err(SolverError::config("zero-stage horizon"));
        }
        let nx = model.state_dim();
        let nu = model.control_dim();
        let search = ParallelLineSearch::new(settings.line_search.max_exponents);
        Ok(Self {
            model,
            cost,
            shot_states: ShotStates::new(nx, horizon),
            lq: LqProblem::new(nx, nu, horizon),
            direction: RwLock::new(UpdateDirection::zero(nx, nu, horizon)),
            search,
            rollout_error: Mutex::new(None),
            iterate: RwLock::new(initial),
            settings,
        })
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The system model collaborator.
    #[inline]
    pub fn model(&self) -> &M {
        &self.model
    }

    /// The cost-function collaborator.
    #[inline]
    pub fn cost(&self) -> &C {
        &self.cost
    }

    /// Number of stages `K`.
    pub fn horizon(&self) -> usize {
        self.read_iterate().horizon()
    }

    /// Shared read access to the current iterate.
    pub fn read_iterate(&self) -> RwLockReadGuard<'_, Iterate> {
        self.iterate.read().expect("iterate lock poisoned")
    }

    /// The LQ sub-problem storage.
    #[inline]
    pub fn lq(&self) -> &LqProblem {
        &self.lq
    }

    /// Snapshot of the shot-state trajectory.
    pub fn shot_states(&self) -> Vec<nalgebra::DVector<f64>> {
        self.shot_states.snapshot()
    }

    /// Install the update direction produced by the backward solver.
    ///
    /// # Panics
    /// Panics if the direction's lengths do not match the horizon.
    pub fn set_direction(&self, direction: UpdateDirection) {
        let horizon = self.horizon();
        assert_eq!(direction.du.len(), horizon, "du length");
        assert_eq!(direction.dx.len(), horizon + 1, "dx length");
        if let Some(gains) = &direction.feedback {
            assert_eq!(gains.len(), horizon, "feedback length");
        }
        *self.direction.write().expect("direction lock poisoned") = direction;
    }

    /// Clone of the installed update direction.
    pub fn direction(&self) -> UpdateDirection {
        self.direction
            .read()
            .expect("direction lock poisoned")
            .clone()
    }

    /// Merit of the current iterate: raw cost plus the weighted norm of the
    /// defects currently stored in the LQ problem.
    pub fn current_merit(&self) -> f64 {
        let it = self.read_iterate();
        let intermediate: f64 = (0..it.horizon())
            .map(|k| self.cost.stage_cost(k, &it.x[k], &it.u[k]))
            .sum();
        let terminal = self.cost.terminal_cost(&it.x[it.horizon()]);
        intermediate + terminal + self.settings.line_search.merit_weight * self.lq.defect_norm()
    }

    /// Fill the terminal cost expansion at the current final state.
    /// Coordinator-side, single slot; runs before the cost dispatch.
    pub fn initialize_terminal_cost(&self) {
        let it = self.read_iterate();
        let x_final = &it.x[it.horizon()];
        self.cost
            .quadratize_terminal(x_final, &mut self.lq.terminal());
    }

    /// Take the first error recorded during a shot-rollout phase, if any.
    pub fn take_rollout_error(&self) -> Result<()> {
        match self
            .rollout_error
            .lock()
            .expect("rollout error slot poisoned")
            .take()
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The line-search protocol object (coordinator side).
    pub(crate) fn search(&self) -> &ParallelLineSearch<Trial> {
        &self.search
    }

    /// Arm the line search against the current iterate's merit.
    pub fn prepare_line_search(&self) -> f64 {
        let previous_merit = self.current_merit();
        self.search.reset(previous_merit);
        previous_merit
    }

    /// Commit the accepted line-search candidate into the iterate and return
    /// `(accepted step size, accepted merit)`. With no improving candidate
    /// the iterate is untouched and the step size is zero.
    pub fn commit_line_search(&self) -> (f64, f64) {
        match self.search.take_accepted() {
            Some(accepted) => {
                let alpha = self.settings.step_size(accepted.exponent);
                let trial = accepted.payload;
                {
                    let mut it = self.iterate.write().expect("iterate lock poisoned");
                    it.x = trial.x;
                    it.u = trial.u;
                }
                self.shot_states.store_all(&trial.x_shot);
                self.lq.store_defects(&trial.defects);
                trace!(
                    exponent = accepted.exponent,
                    alpha,
                    merit = accepted.merit,
                    "line search accepted candidate"
                );
                (alpha, accepted.merit)
            }
            None => {
                let merit = self.current_merit();
                trace!(merit, "line search found no improving step");
                (0.0, merit)
            }
        }
    }

    fn linearize_at(&self, thread_id: usize, k: usize) {
        let it = self.read_iterate();
        let mut stage = self.lq.stage(k);
        let stage = &mut *stage;
        self.model
            .linearize(thread_id, k, &it.x[k], &it.u[k], &mut stage.a, &mut stage.b);
    }

    fn quadratize_at(&self, thread_id: usize, k: usize) {
        let it = self.read_iterate();
        let mut stage = self.lq.stage(k);
        self.cost
            .quadratize(thread_id, k, &it.x[k], &it.u[k], &mut stage.cost);
    }

    /// Roll out the shooting segment starting at `k` and record its boundary
    /// defect. Indices inside a segment are not shot starts and need no
    /// work; the claim is simply marked done by the pool.
    fn rollout_shot_at(&self, thread_id: usize, k: usize) {
        if !is_shot_start(k, self.settings.shot_length) {
            return;
        }
        let it = self.read_iterate();
        let end = segment_end(k, self.settings.shot_length, it.horizon());
        match rollout_segment(&self.model, thread_id, k, end, &it.x[k], &it.u) {
            Ok(states) => {
                for (offset, state) in states.iter().enumerate() {
                    self.shot_states.store(k + offset, state);
                }
                let defect = compute_defect(&states[end - k], &it.x[end]);
                self.lq.stage(end - 1).defect = defect;
            }
            Err(err) => {
                let mut slot = self
                    .rollout_error
                    .lock()
                    .expect("rollout error slot poisoned");
                if slot.is_none() {
                    *slot = Some(err);
                }
            }
        }
    }

    fn evaluate_trial(&self, thread_id: usize, exponent: usize) -> (f64, Trial) {
        let alpha = self.settings.step_size(exponent);
        let it = self.read_iterate();
        let dir = self.direction.read().expect("direction lock poisoned");
        let trial = match self.settings.algorithm {
            Algorithm::SingleShooting => {
                rollout_single_shooting(&self.model, &self.cost, thread_id, alpha, &it, &dir)
            }
            Algorithm::MultipleShooting => rollout_multiple_shooting(
                &self.model,
                &self.cost,
                thread_id,
                alpha,
                &it,
                &dir,
                self.settings.shot_length,
            ),
        };
        let merit = trial.merit(self.settings.line_search.merit_weight);
        trace!(thread_id, exponent, alpha, merit, "evaluated trial step");
        (merit, trial)
    }
}

impl<M, C> TaskRunner for SolverBackend<M, C>
where
    M: SystemModel + 'static,
    C: CostFunction + 'static,
{
    fn process_index(&self, task: Task, thread_id: usize, k: usize) {
        match task {
            Task::LinearizeDynamics => self.linearize_at(thread_id, k),
            Task::ComputeCost => self.quadratize_at(thread_id, k),
            Task::BuildLqProblem => {
                self.quadratize_at(thread_id, k);
                self.linearize_at(thread_id, k);
            }
            Task::RolloutShots => self.rollout_shot_at(thread_id, k),
            Task::Idle | Task::LineSearch | Task::Shutdown => {
                error!(?task, k, "non-range task reached the index worker");
            }
        }
    }

    fn line_search_worker(&self, thread_id: usize) {
        self.search
            .worker_loop(|exponent| self.evaluate_trial(thread_id, exponent));
    }
}
