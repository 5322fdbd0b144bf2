//! Multi-threaded backend for sequential linear-quadratic trajectory
//! optimization (slq-mp).
//!
//! This crate provides the parallel execution engine of a nonlinear
//! optimal-control solver: a persistent worker pool that parallelizes the
//! expensive per-iteration phases — dynamics linearization, cost
//! quadratization, and shooting-segment rollout with defect computation —
//! plus a parallel backtracking line search that reproduces, exactly and for
//! every thread interleaving, the step a sequential backtracking search
//! would pick.
//!
//! ## Core idea
//! 1. Implement the collaborator traits ([`SystemModel`], [`CostFunction`],
//!    [`LqSolver`]) for your system; each per-index method receives a thread
//!    id for thread-local scratch.
//! 2. Hand them, a [`Settings`], and an initial-guess [`Iterate`] to
//!    [`SlqSolver`].
//! 3. Drive iterations with [`SlqSolver::run_iteration`] (or the phase
//!    dispatches individually) and read back the optimized trajectory.
//!
//! Workers claim indices from a shared backward range, so heterogeneous
//! per-index cost is load-balanced automatically; the `(generation, task)`
//! dispatch discriminator guarantees no unit of work is ever executed twice.
//!
//! ## Quick start
//! ```
//! use nalgebra::{DMatrix, DVector};
//! use slq_mp::problems::lti::{LtiCost, LtiSystem, TvlqrSolver};
//! use slq_mp::{Iterate, SettingsBuilder, SlqSolver};
//!
//! let model = LtiSystem::new(
//!     DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]),
//!     DMatrix::from_row_slice(2, 1, &[0.0, 0.1]),
//! );
//! let cost = LtiCost::identity(2, 1);
//! let settings = SettingsBuilder::new().n_threads(2).build().unwrap();
//! let initial = Iterate::constant(DVector::from_vec(vec![1.0, 0.0]), 1, 30);
//!
//! let solver = SlqSolver::new(model, cost, settings, initial).unwrap();
//! let report = solver.solve(&TvlqrSolver::new()).unwrap();
//! assert!(!report.iterations.is_empty());
//! solver.shutdown();
//! ```
//!
//! ## Built-in problems
//! The `problems` module contains reference implementations:
//! - LTI dynamics with quadratic cost and a time-varying LQR backward solver
//! - a damped pendulum with analytic linearization
//!
//! These serve both as ready-to-use tools and as templates for plugging in
//! your own models.

pub mod backend;
pub mod error;
pub mod linalg;
pub mod linesearch;
pub mod lq;
pub mod partition;
pub mod pool;
pub mod problems;
pub mod rollout;
pub mod settings;
pub mod solver;
pub mod task;
pub mod traits;
pub mod trajectory;
pub mod utils;

pub use crate::error::{Result, SolverError};
pub use crate::lq::{LqProblem, UpdateDirection};
pub use crate::settings::{Algorithm, LineSearchSettings, Settings, SettingsBuilder};
pub use crate::solver::{IterationSummary, SlqSolver, SolveReport};
pub use crate::traits::{CostFunction, LqSolver, SystemModel};
pub use crate::trajectory::Iterate;
