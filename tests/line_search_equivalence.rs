//! Parallel backtracking line search vs. the sequential reference.
//!
//! The parallel protocol must return the exact exponent a sequential
//! first-improvement search would return, for every arrival order. Workers
//! are artificially delayed (including in reverse-exponent order, the
//! adversarial case) to force out-of-order evaluation.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use slq_mp::linesearch::ParallelLineSearch;

/// Try exponents 0, 1, 2, … and stop at the first improvement.
fn sequential_reference(merits: &[f64], previous: f64) -> Option<usize> {
    merits.iter().position(|&m| !m.is_nan() && m < previous)
}

fn parallel_search(
    merits: &[f64],
    previous: f64,
    n_workers: usize,
    delays: &[u64],
) -> Option<usize> {
    let search = Arc::new(ParallelLineSearch::new(merits.len()));
    search.reset(previous);
    let merits: Arc<Vec<f64>> = Arc::new(merits.to_vec());
    let delays: Arc<Vec<u64>> = Arc::new(delays.to_vec());
    let workers: Vec<_> = (0..n_workers)
        .map(|_| {
            let search = Arc::clone(&search);
            let merits = Arc::clone(&merits);
            let delays = Arc::clone(&delays);
            thread::spawn(move || {
                search.worker_loop(|exp| {
                    if let Some(&ms) = delays.get(exp) {
                        thread::sleep(Duration::from_millis(ms));
                    }
                    (merits[exp], exp)
                });
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    search.wait_finished();
    search.take_accepted().map(|a| a.exponent)
}

/// Delays that make larger exponents (smaller steps) finish first.
fn reverse_order_delays(n: usize, step_ms: u64) -> Vec<u64> {
    (0..n as u64).rev().map(|d| d * step_ms).collect()
}

#[test]
fn reverse_arrival_matches_sequential_on_fixed_landscape() {
    let merits = vec![8.0, 3.5, 9.0, 2.0, 1.0, 0.1];
    let previous = 4.0;
    let got = parallel_search(&merits, previous, 4, &reverse_order_delays(merits.len(), 12));
    assert_eq!(got, sequential_reference(&merits, previous));
    assert_eq!(got, Some(1));
}

#[test]
fn no_improving_exponent_accepts_step_zero() {
    let merits = vec![10.0, 9.0, 8.0, 7.5, 7.1];
    let previous = 7.0;
    let got = parallel_search(&merits, previous, 3, &reverse_order_delays(merits.len(), 8));
    assert_eq!(got, None);
    assert_eq!(sequential_reference(&merits, previous), None);
}

#[test]
fn all_nan_landscape_accepts_step_zero() {
    let merits = vec![f64::NAN; 6];
    let got = parallel_search(&merits, 1.0, 4, &[]);
    assert_eq!(got, None);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn randomized_landscapes_match_sequential(
        raw in prop::collection::vec(-10.0f64..10.0, 1..12),
        nan_mask in prop::collection::vec(any::<bool>(), 1..12),
        previous in -5.0f64..5.0,
        n_workers in 1usize..5,
    ) {
        let merits: Vec<f64> = raw
            .iter()
            .zip(nan_mask.iter().chain(std::iter::repeat(&false)))
            .map(|(&m, &is_nan)| if is_nan { f64::NAN } else { m })
            .collect();
        let got = parallel_search(&merits, previous, n_workers, &[]);
        prop_assert_eq!(got, sequential_reference(&merits, previous));
    }

    #[test]
    fn randomized_landscapes_with_reverse_delays_match_sequential(
        raw in prop::collection::vec(-10.0f64..10.0, 1..8),
        previous in -5.0f64..5.0,
        n_workers in 2usize..5,
    ) {
        let got = parallel_search(&raw, previous, n_workers, &reverse_order_delays(raw.len(), 3));
        prop_assert_eq!(got, sequential_reference(&raw, previous));
    }
}
