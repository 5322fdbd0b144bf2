//! Linear time-invariant dynamics with quadratic cost, plus a time-varying
//! LQR backward solver.
//!
//! This is the canonical smoke-test problem: the linearization is exact, the
//! quadratization is exact, and the backward solver returns the true Newton
//! direction, so a full step should always be accepted on a consistent
//! iterate.

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::error::{Result, SolverError};
use crate::lq::{LqProblem, StageExpansion, TerminalExpansion, UpdateDirection};
use crate::traits::{CostFunction, LqSolver, SystemModel};
use crate::trajectory::Iterate;

/// Discrete LTI system `x_{k+1} = A x_k + B u_k`.
#[derive(Clone, Debug)]
pub struct LtiSystem {
    pub a: DMatrix<f64>,
    pub b: DMatrix<f64>,
}

impl LtiSystem {
    /// # Panics
    /// Panics if the matrix shapes are inconsistent.
    pub fn new(a: DMatrix<f64>, b: DMatrix<f64>) -> Self {
        assert_eq!(a.nrows(), a.ncols(), "A must be square");
        assert_eq!(a.nrows(), b.nrows(), "A and B row counts differ");
        Self { a, b }
    }
}

impl SystemModel for LtiSystem {
    fn state_dim(&self) -> usize {
        self.a.nrows()
    }

    fn control_dim(&self) -> usize {
        self.b.ncols()
    }

    fn step(
        &self,
        _thread_id: usize,
        k: usize,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let next = &self.a * x + &self.b * u;
        if next.iter().all(|v| v.is_finite()) {
            Ok(next)
        } else {
            Err(SolverError::integration(k, "non-finite state"))
        }
    }

    fn linearize(
        &self,
        _thread_id: usize,
        _k: usize,
        _x: &DVector<f64>,
        _u: &DVector<f64>,
        a: &mut DMatrix<f64>,
        b: &mut DMatrix<f64>,
    ) {
        a.copy_from(&self.a);
        b.copy_from(&self.b);
    }
}

/// Quadratic cost `½ xᵀQx + ½ uᵀRu` per stage, `½ xᵀQ_f x` at the end.
#[derive(Clone, Debug)]
pub struct LtiCost {
    pub q: DMatrix<f64>,
    pub r: DMatrix<f64>,
    pub q_final: DMatrix<f64>,
}

impl LtiCost {
    pub fn new(q: DMatrix<f64>, r: DMatrix<f64>, q_final: DMatrix<f64>) -> Self {
        assert_eq!(q.nrows(), q.ncols(), "Q must be square");
        assert_eq!(r.nrows(), r.ncols(), "R must be square");
        assert_eq!(q.shape(), q_final.shape(), "Q and Q_f shapes differ");
        Self { q, r, q_final }
    }

    /// Identity weights for the given dimensions.
    pub fn identity(nx: usize, nu: usize) -> Self {
        Self::new(
            DMatrix::identity(nx, nx),
            DMatrix::identity(nu, nu),
            DMatrix::identity(nx, nx),
        )
    }
}

impl CostFunction for LtiCost {
    fn stage_cost(&self, _k: usize, x: &DVector<f64>, u: &DVector<f64>) -> f64 {
        0.5 * (x.dot(&(&self.q * x)) + u.dot(&(&self.r * u)))
    }

    fn terminal_cost(&self, x: &DVector<f64>) -> f64 {
        0.5 * x.dot(&(&self.q_final * x))
    }

    fn quadratize(
        &self,
        _thread_id: usize,
        k: usize,
        x: &DVector<f64>,
        u: &DVector<f64>,
        out: &mut StageExpansion,
    ) {
        out.q = self.stage_cost(k, x, u);
        out.qx = &self.q * x;
        out.qu = &self.r * u;
        out.qxx.copy_from(&self.q);
        out.quu.copy_from(&self.r);
        out.pxu.fill(0.0);
    }

    fn quadratize_terminal(&self, x: &DVector<f64>, out: &mut TerminalExpansion) {
        out.q = self.terminal_cost(x);
        out.qx = &self.q_final * x;
        out.qxx.copy_from(&self.q_final);
    }
}

/// Time-varying LQR backward pass over the filled LQ problem.
///
/// Standard Riccati recursion on the quadratic expansions, with the stage
/// defects folded into the value-function gradient so multiple-shooting
/// iterates close their gaps. Returns feedforward updates, the linearized
/// state update, and the feedback gains.
pub struct TvlqrSolver {
    /// Levenberg-style diagonal regularization added to `Q_uu` before
    /// factorization.
    pub reg: f64,
}

impl TvlqrSolver {
    pub fn new() -> Self {
        Self { reg: 0.0 }
    }

    pub fn with_regularization(reg: f64) -> Self {
        Self { reg }
    }
}

impl Default for TvlqrSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LqSolver for TvlqrSolver {
    fn solve(&self, lq: &LqProblem, _iterate: &Iterate) -> Result<UpdateDirection> {
        let horizon = lq.horizon();
        let nx = lq.state_dim();
        let nu = lq.control_dim();

        let (mut s_mat, mut s_vec) = {
            let terminal = lq.terminal();
            (terminal.qxx.clone(), terminal.qx.clone())
        };

        let mut ff = vec![DVector::zeros(nu); horizon];
        let mut gains = vec![DMatrix::zeros(nu, nx); horizon];
        let mut defects = Vec::with_capacity(horizon);

        for k in (0..horizon).rev() {
            let stage = lq.stage(k);
            // Defect shifts the downstream value-function gradient.
            let s_shifted = &s_vec + &s_mat * &stage.defect;

            let q_x = &stage.cost.qx + stage.a.transpose() * &s_shifted;
            let q_u = &stage.cost.qu + stage.b.transpose() * &s_shifted;
            let q_xx = &stage.cost.qxx + stage.a.transpose() * &s_mat * &stage.a;
            let mut q_uu = &stage.cost.quu + stage.b.transpose() * &s_mat * &stage.b;
            let q_ux = &stage.cost.pxu + stage.b.transpose() * &s_mat * &stage.a;

            for i in 0..nu {
                q_uu[(i, i)] += self.reg;
            }
            let chol = Cholesky::new(q_uu.clone()).ok_or_else(|| {
                SolverError::Solve(format!("Q_uu not positive definite at stage {k}"))
            })?;
            let l = -chol.solve(&q_u);
            let k_mat = -chol.solve(&q_ux);

            s_vec = &q_x
                + k_mat.transpose() * &q_uu * &l
                + k_mat.transpose() * &q_u
                + q_ux.transpose() * &l;
            s_mat = &q_xx
                + k_mat.transpose() * &q_uu * &k_mat
                + k_mat.transpose() * &q_ux
                + q_ux.transpose() * &k_mat;
            // Symmetrize against drift.
            s_mat = 0.5 * (&s_mat + s_mat.transpose());

            ff[k] = l;
            gains[k] = k_mat;
            defects.push(stage.defect.clone());
        }
        defects.reverse();

        // Forward pass through the linearized closed loop.
        let mut dx = vec![DVector::zeros(nx); horizon + 1];
        let mut du = vec![DVector::zeros(nu); horizon];
        for k in 0..horizon {
            du[k] = &ff[k] + &gains[k] * &dx[k];
            let stage = lq.stage(k);
            dx[k + 1] = &stage.a * &dx[k] + &stage.b * &du[k] + &defects[k];
        }

        Ok(UpdateDirection {
            du,
            dx,
            feedback: Some(gains),
        })
    }
}
