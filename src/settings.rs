//! Solver configuration surface.
//!
//! Everything the backend reads but never writes: worker-thread counts, the
//! shooting-segment length, and the backtracking line-search constants. The
//! struct is plain data with serde derives so callers can load it from any
//! config format they like; [`Settings::validate`] rejects values the backend
//! cannot run with.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SolverError};

/// Which rollout scheme the solver uses for line-search trials.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Single shooting: one closed-loop rollout of the full horizon per
    /// trial, defects identically zero (iLQR-style).
    SingleShooting,
    /// Multiple shooting: independently initialized segments rolled out in
    /// parallel, boundary defects penalized in the merit (GNMS-style).
    MultipleShooting,
}

/// Backtracking line-search constants.
///
/// Trial step sizes form the geometric sequence
/// `alpha_0 * decay^e` for exponents `e = 0, 1, …, max_exponents - 1`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LineSearchSettings {
    /// Number of trial exponents (the search gives up after this many).
    pub max_exponents: usize,
    /// Step size at exponent zero.
    pub alpha_0: f64,
    /// Geometric decay per exponent, in (0, 1).
    pub decay: f64,
    /// Weight of the defect-norm penalty in the merit function.
    pub merit_weight: f64,
}

impl Default for LineSearchSettings {
    fn default() -> Self {
        Self {
            max_exponents: 10,
            alpha_0: 1.0,
            decay: 0.5,
            merit_weight: 1.0,
        }
    }
}

/// Full backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Number of persistent worker threads (the coordinating thread is not
    /// counted; collaborators see thread ids in `0..=n_threads`).
    pub n_threads: usize,
    /// Thread count granted to the dense-linear-algebra library *outside*
    /// dispatched phases; inside a phase it is restricted to one.
    pub n_threads_linalg: usize,
    /// Shooting-segment length in stages. A value equal to the horizon
    /// degenerates to single shooting.
    pub shot_length: usize,
    /// Rollout scheme for line-search trials.
    pub algorithm: Algorithm,
    /// Backtracking line-search constants.
    pub line_search: LineSearchSettings,
    /// Maximum outer iterations for [`crate::solver::SlqSolver::solve`].
    pub max_iterations: usize,
    /// Convergence threshold on the control-update norm.
    pub update_norm_tolerance: f64,
}

impl Default for Settings {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            n_threads: cores,
            n_threads_linalg: 1,
            shot_length: 1,
            algorithm: Algorithm::MultipleShooting,
            line_search: LineSearchSettings::default(),
            max_iterations: 50,
            update_norm_tolerance: 1e-6,
        }
    }
}

impl Settings {
    /// Check that the configuration is one the backend can run with.
    pub fn validate(&self) -> Result<()> {
        if self.n_threads == 0 {
            return Err(SolverError::config("n_threads must be at least 1"));
        }
        if self.shot_length == 0 {
            return Err(SolverError::config("shot_length must be at least 1"));
        }
        if self.line_search.max_exponents == 0 {
            return Err(SolverError::config(
                "line_search.max_exponents must be at least 1",
            ));
        }
        if !(self.line_search.decay > 0.0 && self.line_search.decay < 1.0) {
            return Err(SolverError::config(
                "line_search.decay must lie strictly between 0 and 1",
            ));
        }
        if !(self.line_search.alpha_0 > 0.0) {
            return Err(SolverError::config("line_search.alpha_0 must be positive"));
        }
        if self.line_search.merit_weight < 0.0 {
            return Err(SolverError::config(
                "line_search.merit_weight must be non-negative",
            ));
        }
        Ok(())
    }

    /// Step size for a given line-search exponent.
    #[inline]
    pub fn step_size(&self, exponent: usize) -> f64 {
        self.line_search.alpha_0 * self.line_search.decay.powi(exponent as i32)
    }
}

/// Builder for [`Settings`] starting from defaults.
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self {
            settings: Settings::default(),
        }
    }

    pub fn n_threads(mut self, n: usize) -> Self {
        self.settings.n_threads = n;
        self
    }

    pub fn n_threads_linalg(mut self, n: usize) -> Self {
        self.settings.n_threads_linalg = n;
        self
    }

    pub fn shot_length(mut self, len: usize) -> Self {
        self.settings.shot_length = len;
        self
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.settings.algorithm = algorithm;
        self
    }

    pub fn line_search(mut self, line_search: LineSearchSettings) -> Self {
        self.settings.line_search = line_search;
        self
    }

    pub fn max_iterations(mut self, n: usize) -> Self {
        self.settings.max_iterations = n;
        self
    }

    pub fn update_norm_tolerance(mut self, tol: f64) -> Self {
        self.settings.update_norm_tolerance = tol;
        self
    }

    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
