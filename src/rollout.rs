//! Forward rollouts: shooting segments, defects, and line-search trials.
//!
//! A shooting segment `[s, e]` is propagated forward from its start state;
//! the defect is the mismatch between the rolled-out end state and the stored
//! start state of the next segment, recorded at stage `e - 1`. Under single
//! shooting there is exactly one segment and defects vanish.

use nalgebra::DVector;

use crate::error::Result;
use crate::lq::UpdateDirection;
use crate::traits::{CostFunction, SystemModel};
use crate::trajectory::Iterate;

/// End index (inclusive) of the segment starting at `start`.
#[inline]
pub fn segment_end(start: usize, shot_length: usize, horizon: usize) -> usize {
    (start + shot_length).min(horizon)
}

/// Roll one segment forward from `x_start`, applying `controls[k]` at each
/// stage `k` in `start..end`.
///
/// Returns the states `x_start … x_end` (length `end - start + 1`).
pub fn rollout_segment<M: SystemModel>(
    model: &M,
    thread_id: usize,
    start: usize,
    end: usize,
    x_start: &DVector<f64>,
    controls: &[DVector<f64>],
) -> Result<Vec<DVector<f64>>> {
    let mut states = Vec::with_capacity(end - start + 1);
    states.push(x_start.clone());
    let mut x = x_start.clone();
    for k in start..end {
        x = model.step(thread_id, k, &x, &controls[k])?;
        states.push(x.clone());
    }
    Ok(states)
}

/// Defect between a rolled-out segment end state and the stored start state
/// of the next segment.
#[inline]
pub fn compute_defect(rolled_end: &DVector<f64>, stored_next: &DVector<f64>) -> DVector<f64> {
    rolled_end - stored_next
}

/// One evaluated line-search candidate.
#[derive(Clone, Debug)]
pub struct Trial {
    pub x: Vec<DVector<f64>>,
    pub x_shot: Vec<DVector<f64>>,
    pub u: Vec<DVector<f64>>,
    pub defects: Vec<DVector<f64>>,
    pub intermediate_cost: f64,
    pub final_cost: f64,
    pub defect_norm: f64,
}

impl Trial {
    /// Merit of this trial under the given defect weight.
    ///
    /// A diverged rollout leaves non-finite costs here, so the merit is
    /// non-finite and the candidate comparison rejects it.
    #[inline]
    pub fn merit(&self, merit_weight: f64) -> f64 {
        self.intermediate_cost + self.final_cost + merit_weight * self.defect_norm
    }

    /// A trial with infinite cost, used when a rollout diverges mid-trial.
    fn diverged(x: Vec<DVector<f64>>, u: Vec<DVector<f64>>, nx: usize, horizon: usize) -> Self {
        Self {
            x_shot: x.clone(),
            x,
            u,
            defects: vec![DVector::zeros(nx); horizon],
            intermediate_cost: f64::INFINITY,
            final_cost: f64::INFINITY,
            defect_norm: f64::INFINITY,
        }
    }
}

/// Closed-loop single-shooting trial rollout.
///
/// Controls follow `u_k = u_prev_k + alpha * du_k + K_k (x_k - x_prev_k)`
/// with the feedback term present only when the direction carries gains.
/// Defects are identically zero; the shot-state trajectory coincides with
/// the state trajectory.
pub fn rollout_single_shooting<M, C>(
    model: &M,
    cost: &C,
    thread_id: usize,
    alpha: f64,
    prev: &Iterate,
    direction: &UpdateDirection,
) -> Trial
where
    M: SystemModel,
    C: CostFunction,
{
    let horizon = prev.horizon();
    let nx = prev.state_dim();

    let mut x = Vec::with_capacity(horizon + 1);
    let mut u = Vec::with_capacity(horizon);
    x.push(prev.x[0].clone());

    let mut intermediate_cost = 0.0;
    for k in 0..horizon {
        let mut u_k = &prev.u[k] + alpha * &direction.du[k];
        if let Some(gains) = &direction.feedback {
            u_k += &gains[k] * (&x[k] - &prev.x[k]);
        }
        intermediate_cost += cost.stage_cost(k, &x[k], &u_k);
        match model.step(thread_id, k, &x[k], &u_k) {
            Ok(next) => x.push(next),
            Err(_) => {
                u.push(u_k);
                return Trial::diverged(x, u, nx, horizon);
            }
        }
        u.push(u_k);
    }
    let final_cost = cost.terminal_cost(&x[horizon]);

    Trial {
        x_shot: x.clone(),
        defects: vec![DVector::zeros(nx); horizon],
        x,
        u,
        intermediate_cost,
        final_cost,
        defect_norm: 0.0,
    }
}

/// Multiple-shooting trial rollout.
///
/// Shot-start states take the direction update
/// (`x_s = x_prev_s + alpha * dx_s`, initial state pinned) and controls take
/// `u_k = u_prev_k + alpha * du_k`; each segment is rolled forward from its
/// updated start state, segment interiors adopt the rolled states, and the
/// mismatch against the next segment's own start state is recorded as the
/// boundary defect. Interiors are therefore consistent by construction, so
/// the recorded defects capture all of the trajectory's inconsistency.
pub fn rollout_multiple_shooting<M, C>(
    model: &M,
    cost: &C,
    thread_id: usize,
    alpha: f64,
    prev: &Iterate,
    direction: &UpdateDirection,
    shot_length: usize,
) -> Trial
where
    M: SystemModel,
    C: CostFunction,
{
    let horizon = prev.horizon();
    let nx = prev.state_dim();

    let mut x = Vec::with_capacity(horizon + 1);
    x.push(prev.x[0].clone());
    for k in 1..=horizon {
        x.push(&prev.x[k] + alpha * &direction.dx[k]);
    }
    let u: Vec<DVector<f64>> = (0..horizon)
        .map(|k| &prev.u[k] + alpha * &direction.du[k])
        .collect();

    let mut x_shot = x.clone();
    let mut defects = vec![DVector::zeros(nx); horizon];
    let mut defect_norm = 0.0;

    let mut start = 0;
    while start < horizon {
        let end = segment_end(start, shot_length, horizon);
        match rollout_segment(model, thread_id, start, end, &x[start], &u) {
            Ok(states) => {
                for (offset, state) in states.iter().enumerate() {
                    let idx = start + offset;
                    x_shot[idx] = state.clone();
                    if idx > start && idx < end {
                        x[idx] = state.clone();
                    }
                }
                let defect = compute_defect(&x_shot[end], &x[end]);
                defect_norm += defect.norm();
                defects[end - 1] = defect;
            }
            Err(_) => return Trial::diverged(x, u, nx, horizon),
        }
        start = end;
    }

    let intermediate_cost: f64 = (0..horizon).map(|k| cost.stage_cost(k, &x[k], &u[k])).sum();
    let final_cost = cost.terminal_cost(&x[horizon]);

    Trial {
        x,
        x_shot,
        u,
        defects,
        intermediate_cost,
        final_cost,
        defect_norm,
    }
}
