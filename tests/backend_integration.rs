//! Full-iteration integration tests on the reference problems.

use nalgebra::{DMatrix, DVector};
use slq_mp::problems::lti::{LtiCost, LtiSystem, TvlqrSolver};
use slq_mp::problems::pendulum::Pendulum;
use slq_mp::rollout::rollout_segment;
use slq_mp::traits::SystemModel;
use slq_mp::{
    Algorithm, Iterate, Result, SettingsBuilder, Settings, SlqSolver, SolverError,
};

fn double_integrator() -> LtiSystem {
    LtiSystem::new(
        DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]),
        DMatrix::from_row_slice(2, 1, &[0.0, 0.1]),
    )
}

fn rolled_iterate<M: SystemModel>(model: &M, x0: DVector<f64>, horizon: usize) -> Iterate {
    let u = vec![DVector::zeros(model.control_dim()); horizon];
    let x = rollout_segment(model, 0, 0, horizon, &x0, &u).unwrap();
    Iterate::from_parts(x, u)
}

fn lti_settings(n_threads: usize, shot_length: usize, algorithm: Algorithm) -> Settings {
    SettingsBuilder::new()
        .n_threads(n_threads)
        .shot_length(shot_length)
        .algorithm(algorithm)
        .max_iterations(20)
        .build()
        .unwrap()
}

#[test]
fn lti_single_shooting_converges() {
    let initial = rolled_iterate(&double_integrator(), DVector::from_vec(vec![2.0, 0.0]), 40);
    let solver = SlqSolver::new(
        double_integrator(),
        LtiCost::identity(2, 1),
        lti_settings(4, 40, Algorithm::SingleShooting),
        initial,
    )
    .unwrap();
    let report = solver.solve(&TvlqrSolver::new()).unwrap();
    assert!(!report.iterations.is_empty());
    // The first iteration of an LQ problem takes the full Newton step.
    assert!(report.iterations[0].step_size > 0.0);
    assert!(report.converged, "LTI problem must converge");
    solver.shutdown();
}

#[test]
fn merit_is_monotone_across_accepted_iterations() {
    let pendulum = Pendulum::with_timestep(0.05);
    let initial = rolled_iterate(&pendulum, DVector::from_vec(vec![0.6, 0.0]), 40);
    let solver = SlqSolver::new(
        Pendulum::with_timestep(0.05),
        LtiCost::identity(2, 1),
        lti_settings(4, 40, Algorithm::SingleShooting),
        initial,
    )
    .unwrap();
    let report = solver.solve(&TvlqrSolver::with_regularization(1e-6)).unwrap();
    for pair in report.iterations.windows(2) {
        assert!(
            pair[1].merit <= pair[0].merit + 1e-9,
            "merit increased: {} -> {}",
            pair[0].merit,
            pair[1].merit
        );
    }
    solver.shutdown();
}

#[test]
fn multiple_shooting_closes_defects_on_lti() {
    // Inconsistent initial guess: constant state with non-zero velocity.
    let initial = Iterate::constant(DVector::from_vec(vec![1.0, 0.5]), 1, 30);
    let solver = SlqSolver::new(
        double_integrator(),
        LtiCost::identity(2, 1),
        lti_settings(4, 5, Algorithm::MultipleShooting),
        initial,
    )
    .unwrap();
    solver.dispatch_shot_rollout(0, 29).unwrap();
    let initial_defect = solver.backend().lq().defect_norm();
    assert!(initial_defect > 0.0, "inconsistent guess must have defects");

    let tvlqr = TvlqrSolver::new();
    for _ in 0..4 {
        solver.run_iteration(&tvlqr).unwrap();
    }
    // On a linear system the forward pass closes the gaps exactly; the
    // committed trial's defects must be numerically zero.
    let final_defect = solver.backend().lq().defect_norm();
    assert!(
        final_defect < 1e-8,
        "defects must close: {initial_defect} -> {final_defect}"
    );
    solver.shutdown();
}

#[test]
fn single_shooting_degenerate_segment_length_has_zero_defects() {
    let initial = rolled_iterate(&double_integrator(), DVector::from_vec(vec![1.0, 0.0]), 25);
    // Segment length equals trajectory length: multiple shooting degenerates
    // to single shooting and defects vanish everywhere.
    let solver = SlqSolver::new(
        double_integrator(),
        LtiCost::identity(2, 1),
        lti_settings(3, 25, Algorithm::MultipleShooting),
        initial,
    )
    .unwrap();
    solver.dispatch_shot_rollout(0, 24).unwrap();
    assert_eq!(solver.backend().lq().defect_norm(), 0.0);
    solver.shutdown();
}

#[test]
fn thread_count_does_not_change_the_result() {
    let run = |n_threads: usize| -> Iterate {
        let initial =
            rolled_iterate(&double_integrator(), DVector::from_vec(vec![2.0, -1.0]), 30);
        let solver = SlqSolver::new(
            double_integrator(),
            LtiCost::identity(2, 1),
            lti_settings(n_threads, 5, Algorithm::MultipleShooting),
            initial,
        )
        .unwrap();
        let tvlqr = TvlqrSolver::new();
        for _ in 0..3 {
            solver.run_iteration(&tvlqr).unwrap();
        }
        let result = solver.iterate();
        solver.shutdown();
        result
    };
    let serial = run(1);
    let parallel = run(6);
    // Same phases, same line-search decision, bit-identical arithmetic.
    assert_eq!(serial, parallel);
}

/// Model whose integrator blows up at one specific stage.
struct FaultyModel {
    inner: LtiSystem,
    faulty_stage: usize,
}

impl SystemModel for FaultyModel {
    fn state_dim(&self) -> usize {
        self.inner.state_dim()
    }

    fn control_dim(&self) -> usize {
        self.inner.control_dim()
    }

    fn step(
        &self,
        thread_id: usize,
        k: usize,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        if k == self.faulty_stage {
            return Err(SolverError::integration(k, "synthetic divergence"));
        }
        self.inner.step(thread_id, k, x, u)
    }

    fn linearize(
        &self,
        thread_id: usize,
        k: usize,
        x: &DVector<f64>,
        u: &DVector<f64>,
        a: &mut DMatrix<f64>,
        b: &mut DMatrix<f64>,
    ) {
        self.inner.linearize(thread_id, k, x, u, a, b);
    }
}

#[test]
fn rollout_divergence_is_surfaced_not_retried() {
    let model = FaultyModel {
        inner: double_integrator(),
        faulty_stage: 7,
    };
    let initial = Iterate::constant(DVector::from_vec(vec![1.0, 0.0]), 1, 20);
    let solver = SlqSolver::new(
        model,
        LtiCost::identity(2, 1),
        lti_settings(4, 1, Algorithm::MultipleShooting),
        initial,
    )
    .unwrap();
    let err = solver.dispatch_shot_rollout(0, 19).unwrap_err();
    assert!(matches!(err, SolverError::Integration { stage: 7, .. }));
    // The error is consumed; the next rollout over healthy stages is clean.
    solver.dispatch_shot_rollout(0, 6).unwrap();
    solver.shutdown();
}
