//! Storage for the per-stage linear-quadratic sub-problem.
//!
//! One [`LqStage`] per stage holds the linearized dynamics, the quadratic
//! cost expansion, and the shooting defect at that stage. Phase workers fill
//! stages one claimed index at a time; the external backward solver consumes
//! the whole problem after the coordinator has observed phase completion.
//!
//! Each stage sits behind its own mutex. Index claims are exclusive, so the
//! locks are never contended; they exist to make the disjoint-slot write
//! pattern expressible in safe Rust.

use std::sync::{Mutex, MutexGuard};

use nalgebra::{DMatrix, DVector};

/// Quadratic expansion of the stage cost around the current iterate.
#[derive(Clone, Debug)]
pub struct StageExpansion {
    /// Cost value at the expansion point.
    pub q: f64,
    /// Gradient w.r.t. the state.
    pub qx: DVector<f64>,
    /// Gradient w.r.t. the control.
    pub qu: DVector<f64>,
    /// Hessian block w.r.t. the state.
    pub qxx: DMatrix<f64>,
    /// Hessian block w.r.t. the control.
    pub quu: DMatrix<f64>,
    /// Cross Hessian block (control rows, state columns).
    pub pxu: DMatrix<f64>,
}

impl StageExpansion {
    pub fn zeros(nx: usize, nu: usize) -> Self {
        Self {
            q: 0.0,
            qx: DVector::zeros(nx),
            qu: DVector::zeros(nu),
            qxx: DMatrix::zeros(nx, nx),
            quu: DMatrix::zeros(nu, nu),
            pxu: DMatrix::zeros(nu, nx),
        }
    }
}

/// Quadratic expansion of the terminal cost.
#[derive(Clone, Debug)]
pub struct TerminalExpansion {
    pub q: f64,
    pub qx: DVector<f64>,
    pub qxx: DMatrix<f64>,
}

impl TerminalExpansion {
    pub fn zeros(nx: usize) -> Self {
        Self {
            q: 0.0,
            qx: DVector::zeros(nx),
            qxx: DMatrix::zeros(nx, nx),
        }
    }
}

/// Linear-quadratic data for one stage.
#[derive(Clone, Debug)]
pub struct LqStage {
    /// State sensitivity of the discrete dynamics.
    pub a: DMatrix<f64>,
    /// Control sensitivity of the discrete dynamics.
    pub b: DMatrix<f64>,
    /// Shooting defect recorded at this stage.
    pub defect: DVector<f64>,
    /// Quadratic cost expansion at this stage.
    pub cost: StageExpansion,
}

impl LqStage {
    pub fn zeros(nx: usize, nu: usize) -> Self {
        Self {
            a: DMatrix::zeros(nx, nx),
            b: DMatrix::zeros(nx, nu),
            defect: DVector::zeros(nx),
            cost: StageExpansion::zeros(nx, nu),
        }
    }
}

/// The full LQ sub-problem over the horizon.
#[derive(Debug)]
pub struct LqProblem {
    stages: Vec<Mutex<LqStage>>,
    terminal: Mutex<TerminalExpansion>,
    nx: usize,
    nu: usize,
}

impl LqProblem {
    /// Allocate a zeroed problem for `horizon` stages of the given
    /// state/control dimensions.
    pub fn new(nx: usize, nu: usize, horizon: usize) -> Self {
        Self {
            stages: (0..horizon)
                .map(|_| Mutex::new(LqStage::zeros(nx, nu)))
                .collect(),
            terminal: Mutex::new(TerminalExpansion::zeros(nx)),
            nx,
            nu,
        }
    }

    /// Number of stages.
    #[inline]
    pub fn horizon(&self) -> usize {
        self.stages.len()
    }

    #[inline]
    pub fn state_dim(&self) -> usize {
        self.nx
    }

    #[inline]
    pub fn control_dim(&self) -> usize {
        self.nu
    }

    /// Exclusive access to stage `k`.
    pub fn stage(&self, k: usize) -> MutexGuard<'_, LqStage> {
        self.stages[k].lock().expect("lq stage lock poisoned")
    }

    /// Exclusive access to the terminal expansion.
    pub fn terminal(&self) -> MutexGuard<'_, TerminalExpansion> {
        self.terminal.lock().expect("terminal expansion lock poisoned")
    }

    /// Sum of the per-stage defect L2 norms.
    pub fn defect_norm(&self) -> f64 {
        self.stages.iter().map(|s| stage_defect_norm(s)).sum()
    }

    /// Snapshot of the defect sequence.
    pub fn defects(&self) -> Vec<DVector<f64>> {
        self.stages
            .iter()
            .map(|s| s.lock().expect("lq stage lock poisoned").defect.clone())
            .collect()
    }

    /// Replace the defect sequence wholesale.
    ///
    /// # Panics
    /// Panics if `defects.len()` differs from the horizon.
    pub fn store_defects(&self, defects: &[DVector<f64>]) {
        assert_eq!(defects.len(), self.horizon(), "defect sequence length");
        for (slot, d) in self.stages.iter().zip(defects) {
            slot.lock().expect("lq stage lock poisoned").defect = d.clone();
        }
    }
}

fn stage_defect_norm(stage: &Mutex<LqStage>) -> f64 {
    stage.lock().expect("lq stage lock poisoned").defect.norm()
}

/// Update direction produced by the external backward solver.
///
/// `du[k]` is the feedforward control update at stage `k`, `dx[k]` the state
/// update at index `k` (`dx[0]` is ignored: the initial state is pinned).
/// `feedback`, when present, carries per-stage state-feedback gains applied
/// during single-shooting trial rollouts.
#[derive(Clone, Debug)]
pub struct UpdateDirection {
    pub du: Vec<DVector<f64>>,
    pub dx: Vec<DVector<f64>>,
    pub feedback: Option<Vec<DMatrix<f64>>>,
}

impl UpdateDirection {
    /// A zero direction for the given dimensions (no-op update).
    pub fn zero(nx: usize, nu: usize, horizon: usize) -> Self {
        Self {
            du: vec![DVector::zeros(nu); horizon],
            dx: vec![DVector::zeros(nx); horizon + 1],
            feedback: None,
        }
    }

    /// Summed L2 norm of the feedforward control updates.
    pub fn control_update_norm(&self) -> f64 {
        crate::utils::array_norm(&self.du)
    }
}
