//! Stabilize a damped pendulum from a large initial deflection.
//!
//! Run with: `cargo run --release --example pendulum_swing`

use nalgebra::{DMatrix, DVector};
use slq_mp::problems::lti::{LtiCost, TvlqrSolver};
use slq_mp::problems::pendulum::Pendulum;
use slq_mp::rollout::rollout_segment;
use slq_mp::{Algorithm, Iterate, SettingsBuilder, SlqSolver};

fn main() {
    let dt = 0.02;
    let horizon = 150;
    let pendulum = Pendulum::with_timestep(dt);

    // Initial guess: free swing from 1.2 rad with zero torque.
    let x0 = DVector::from_vec(vec![1.2, 0.0]);
    let u_guess = vec![DVector::zeros(1); horizon];
    let x_guess = rollout_segment(&pendulum, 0, 0, horizon, &x0, &u_guess)
        .expect("free swing stays finite");
    let initial = Iterate::from_parts(x_guess, u_guess);

    let cost = LtiCost::new(
        DMatrix::from_diagonal(&DVector::from_vec(vec![10.0, 1.0])),
        DMatrix::from_element(1, 1, 0.1),
        DMatrix::from_diagonal(&DVector::from_vec(vec![100.0, 10.0])),
    );
    let settings = SettingsBuilder::new()
        .n_threads(4)
        .shot_length(horizon)
        .algorithm(Algorithm::SingleShooting)
        .max_iterations(30)
        .build()
        .expect("demo settings are valid");

    let solver = SlqSolver::new(pendulum, cost, settings, initial).expect("well-formed problem");
    let report = solver
        .solve(&TvlqrSolver::with_regularization(1e-6))
        .expect("pendulum problem solves");

    println!("iter  step      merit          |du|");
    for (i, it) in report.iterations.iter().enumerate() {
        println!(
            "{i:>4}  {:<8.4} {:<14.6} {:<10.6}",
            it.step_size, it.merit, it.control_update_norm
        );
    }
    let final_iterate = solver.iterate();
    let final_state = &final_iterate.x[horizon];
    println!(
        "converged: {} | final state: θ = {:.4} rad, ω = {:.4} rad/s",
        report.converged, final_state[0], final_state[1]
    );
    solver.shutdown();
}
