//! Damped pendulum with analytic linearization.
//!
//! State `(θ, ω)`, torque input, semi-implicit Euler integration:
//!
//! ```text
//! ω₊ = ω + dt (−(g/l) sin θ − b ω + u / (m l²))
//! θ₊ = θ + dt ω₊
//! ```
//!
//! The nonlinearity keeps the solver honest: linearizations vary along the
//! trajectory and a full Newton step is not always accepted.

use nalgebra::{DMatrix, DVector};

use crate::error::{Result, SolverError};
use crate::traits::SystemModel;

/// Pendulum parameters.
#[derive(Clone, Debug)]
pub struct Pendulum {
    pub dt: f64,
    pub gravity: f64,
    pub length: f64,
    pub mass: f64,
    pub damping: f64,
}

impl Pendulum {
    /// A unit pendulum with mild damping at the given timestep.
    pub fn with_timestep(dt: f64) -> Self {
        Self {
            dt,
            gravity: 9.81,
            length: 1.0,
            mass: 1.0,
            damping: 0.1,
        }
    }

    #[inline]
    fn inertia(&self) -> f64 {
        self.mass * self.length * self.length
    }
}

impl SystemModel for Pendulum {
    fn state_dim(&self) -> usize {
        2
    }

    fn control_dim(&self) -> usize {
        1
    }

    fn step(
        &self,
        _thread_id: usize,
        k: usize,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        let (theta, omega) = (x[0], x[1]);
        let accel =
            -(self.gravity / self.length) * theta.sin() - self.damping * omega + u[0] / self.inertia();
        let omega_next = omega + self.dt * accel;
        let theta_next = theta + self.dt * omega_next;
        if theta_next.is_finite() && omega_next.is_finite() {
            Ok(DVector::from_vec(vec![theta_next, omega_next]))
        } else {
            Err(SolverError::integration(k, "pendulum state diverged"))
        }
    }

    fn linearize(
        &self,
        _thread_id: usize,
        _k: usize,
        x: &DVector<f64>,
        _u: &DVector<f64>,
        a: &mut DMatrix<f64>,
        b: &mut DMatrix<f64>,
    ) {
        let dt = self.dt;
        let domega_dtheta = -dt * (self.gravity / self.length) * x[0].cos();
        let domega_domega = 1.0 - dt * self.damping;
        let domega_du = dt / self.inertia();

        a[(0, 0)] = 1.0 + dt * domega_dtheta;
        a[(0, 1)] = dt * domega_domega;
        a[(1, 0)] = domega_dtheta;
        a[(1, 1)] = domega_domega;

        b[(0, 0)] = dt * domega_du;
        b[(1, 0)] = domega_du;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn equilibrium_is_fixed_point() {
        let p = Pendulum::with_timestep(0.01);
        let x = DVector::zeros(2);
        let u = DVector::zeros(1);
        let next = p.step(0, 0, &x, &u).unwrap();
        assert_relative_eq!(next.norm(), 0.0);
    }

    #[test]
    fn linearization_matches_finite_differences() {
        let p = Pendulum::with_timestep(0.02);
        let x = DVector::from_vec(vec![0.7, -0.3]);
        let u = DVector::from_vec(vec![0.4]);
        let mut a = DMatrix::zeros(2, 2);
        let mut b = DMatrix::zeros(2, 1);
        p.linearize(0, 0, &x, &u, &mut a, &mut b);

        let eps = 1e-6;
        let base = p.step(0, 0, &x, &u).unwrap();
        for j in 0..2 {
            let mut xp = x.clone();
            xp[j] += eps;
            let fd = (p.step(0, 0, &xp, &u).unwrap() - &base) / eps;
            for i in 0..2 {
                assert_relative_eq!(a[(i, j)], fd[i], epsilon = 1e-4);
            }
        }
        let mut up = u.clone();
        up[0] += eps;
        let fd = (p.step(0, 0, &x, &up).unwrap() - &base) / eps;
        for i in 0..2 {
            assert_relative_eq!(b[(i, 0)], fd[i], epsilon = 1e-4);
        }
    }

    #[test]
    fn absurd_state_reports_divergence() {
        let p = Pendulum::with_timestep(0.01);
        let x = DVector::from_vec(vec![f64::NAN, 0.0]);
        let u = DVector::zeros(1);
        assert!(matches!(
            p.step(0, 5, &x, &u),
            Err(SolverError::Integration { stage: 5, .. })
        ));
    }
}
