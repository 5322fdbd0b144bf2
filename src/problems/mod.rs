//! Reference problem implementations for the solver backend.
//!
//! These modules show how to implement the collaborator traits
//! ([`SystemModel`](crate::traits::SystemModel),
//! [`CostFunction`](crate::traits::CostFunction),
//! [`LqSolver`](crate::traits::LqSolver)) for concrete systems.
//!
//! They are both usable and serve as templates:
//! - [`lti`]      : linear time-invariant dynamics, quadratic cost, and a
//!                  time-varying LQR backward solver.
//! - [`pendulum`] : damped pendulum with analytic linearization.

pub mod lti;
pub mod pendulum;
