#![cfg(feature = "heavy")]
use nalgebra::{DMatrix, DVector};
use rand::{rngs::StdRng, Rng, SeedableRng};
use slq_mp::problems::lti::{LtiCost, LtiSystem, TvlqrSolver};
use slq_mp::{Algorithm, Iterate, SettingsBuilder, SlqSolver};

fn random_stable_system(rng: &mut StdRng, nx: usize, nu: usize) -> LtiSystem {
    // Contractive A keeps long rollouts bounded.
    let mut a = DMatrix::from_fn(nx, nx, |_, _| rng.gen_range(-0.2..0.2));
    for i in 0..nx {
        a[(i, i)] += 0.7;
    }
    let b = DMatrix::from_fn(nx, nu, |_, _| rng.gen_range(-0.5..0.5));
    LtiSystem::new(a, b)
}

#[test]
fn heavy_stress_long_horizon_multiple_shooting() {
    let mut rng = StdRng::seed_from_u64(123);
    let model = random_stable_system(&mut rng, 6, 2);
    let x0 = DVector::from_fn(6, |_, _| rng.gen_range(-1.0..1.0));
    let initial = Iterate::constant(x0, 2, 5_000);
    let settings = SettingsBuilder::new()
        .n_threads(8)
        .shot_length(50)
        .algorithm(Algorithm::MultipleShooting)
        .max_iterations(10)
        .build()
        .unwrap();
    let solver = SlqSolver::new(model, LtiCost::identity(6, 2), settings, initial).unwrap();
    let report = solver.solve(&TvlqrSolver::new()).unwrap();
    assert!(!report.iterations.is_empty());
    // Defects must have closed on the linear system.
    assert!(solver.backend().lq().defect_norm() < 1e-6);
    solver.shutdown();
}

#[test]
fn heavy_stress_many_dispatch_cycles() {
    let mut rng = StdRng::seed_from_u64(7);
    let model = random_stable_system(&mut rng, 4, 1);
    let x0 = DVector::from_fn(4, |_, _| rng.gen_range(-1.0..1.0));
    let initial = Iterate::constant(x0, 1, 256);
    let settings = SettingsBuilder::new()
        .n_threads(8)
        .shot_length(8)
        .build()
        .unwrap();
    let solver = SlqSolver::new(model, LtiCost::identity(4, 1), settings, initial).unwrap();
    for _ in 0..2_000 {
        solver.dispatch_lq_build(0, 255);
    }
    solver.shutdown();
}
