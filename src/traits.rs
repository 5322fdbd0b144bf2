//! Collaborator seams consumed by the backend.
//!
//! The backend schedules work; the actual numerics live behind these traits:
//! the dynamical system with its derivatives, the cost function with its
//! quadratic expansion, and the linear-quadratic backward solver that turns a
//! filled [`LqProblem`] into an update direction. Every per-index method
//! takes a `thread_id` so implementations can index thread-local scratch
//! (ids run `0..=n_threads`; the extra id is the coordinator's inline
//! fast path).
//!
//! All implementations must be `Send + Sync`: phase workers call them
//! concurrently, one claimed index at a time.

use nalgebra::{DMatrix, DVector};

use crate::error::Result;
use crate::lq::{LqProblem, StageExpansion, TerminalExpansion, UpdateDirection};
use crate::trajectory::Iterate;

/// Discrete-time dynamical system with first-order sensitivities.
pub trait SystemModel: Send + Sync {
    /// State dimension.
    fn state_dim(&self) -> usize;

    /// Control dimension.
    fn control_dim(&self) -> usize;

    /// Propagate one timestep from `(x, u)` at stage `k`.
    ///
    /// Fails with [`crate::error::SolverError::Integration`] if the
    /// underlying integrator diverges; the backend propagates the failure
    /// without retrying.
    fn step(
        &self,
        thread_id: usize,
        k: usize,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>>;

    /// Write the state and control sensitivities of `step` at `(x, u)` into
    /// `a` (state) and `b` (control).
    fn linearize(
        &self,
        thread_id: usize,
        k: usize,
        x: &DVector<f64>,
        u: &DVector<f64>,
        a: &mut DMatrix<f64>,
        b: &mut DMatrix<f64>,
    );
}

/// Cost functional with quadratic expansions.
pub trait CostFunction: Send + Sync {
    /// Stage cost at stage `k`.
    fn stage_cost(&self, k: usize, x: &DVector<f64>, u: &DVector<f64>) -> f64;

    /// Terminal cost at the final state.
    fn terminal_cost(&self, x: &DVector<f64>) -> f64;

    /// Write the quadratic expansion of the stage cost at `(x, u)` into
    /// `out`.
    fn quadratize(
        &self,
        thread_id: usize,
        k: usize,
        x: &DVector<f64>,
        u: &DVector<f64>,
        out: &mut StageExpansion,
    );

    /// Write the quadratic expansion of the terminal cost into `out`.
    fn quadratize_terminal(&self, x: &DVector<f64>, out: &mut TerminalExpansion);
}

/// The external backward solver (Riccati-style recursion).
///
/// Consumes the filled LQ sub-problem after all phases have completed and
/// returns the candidate update direction the line search will step along.
pub trait LqSolver: Send + Sync {
    fn solve(&self, lq: &LqProblem, iterate: &Iterate) -> Result<UpdateDirection>;
}
