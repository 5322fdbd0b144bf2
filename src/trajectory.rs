//! Trajectory containers owned by the coordinator.
//!
//! The iterate (states and controls) is replaced wholesale when a line search
//! accepts a candidate; during dispatched phases workers only read it. The
//! shot-state trajectory is the one container written index-wise by workers,
//! so its slots carry individual mutexes (uncontended: each slot belongs to
//! exactly one claimed segment).

use std::sync::Mutex;

use nalgebra::DVector;

/// One solver iterate: `K + 1` states and `K` controls.
#[derive(Clone, Debug, PartialEq)]
pub struct Iterate {
    /// States `x_0 … x_K`; index 0 is the initial condition.
    pub x: Vec<DVector<f64>>,
    /// Controls `u_0 … u_{K-1}`.
    pub u: Vec<DVector<f64>>,
}

impl Iterate {
    /// Build an iterate from explicit state and control sequences.
    ///
    /// # Panics
    /// Panics unless `x.len() == u.len() + 1` and the sequences are
    /// dimensionally consistent.
    pub fn from_parts(x: Vec<DVector<f64>>, u: Vec<DVector<f64>>) -> Self {
        assert_eq!(x.len(), u.len() + 1, "need K+1 states for K controls");
        assert!(!x.is_empty(), "empty trajectory");
        let nx = x[0].len();
        let nu = u.first().map(|v| v.len()).unwrap_or(0);
        assert!(x.iter().all(|v| v.len() == nx), "inconsistent state dims");
        assert!(u.iter().all(|v| v.len() == nu), "inconsistent control dims");
        Self { x, u }
    }

    /// A constant initial guess: every state equal to `x0`, every control
    /// zero.
    pub fn constant(x0: DVector<f64>, nu: usize, horizon: usize) -> Self {
        Self {
            x: vec![x0; horizon + 1],
            u: vec![DVector::zeros(nu); horizon],
        }
    }

    /// Number of stages `K`.
    #[inline]
    pub fn horizon(&self) -> usize {
        self.u.len()
    }

    #[inline]
    pub fn state_dim(&self) -> usize {
        self.x[0].len()
    }

    #[inline]
    pub fn control_dim(&self) -> usize {
        self.u.first().map(|v| v.len()).unwrap_or(0)
    }
}

/// Shot-state trajectory: states produced by rolling each shooting segment
/// forward from its start state.
#[derive(Debug)]
pub struct ShotStates {
    slots: Vec<Mutex<DVector<f64>>>,
}

impl ShotStates {
    /// Allocate `horizon + 1` zeroed slots of dimension `nx`.
    pub fn new(nx: usize, horizon: usize) -> Self {
        Self {
            slots: (0..=horizon)
                .map(|_| Mutex::new(DVector::zeros(nx)))
                .collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Overwrite slot `i`.
    pub fn store(&self, i: usize, value: &DVector<f64>) {
        *self.slots[i].lock().expect("shot-state lock poisoned") = value.clone();
    }

    /// Clone of slot `i`.
    pub fn get(&self, i: usize) -> DVector<f64> {
        self.slots[i].lock().expect("shot-state lock poisoned").clone()
    }

    /// Clone of the whole sequence.
    pub fn snapshot(&self) -> Vec<DVector<f64>> {
        self.slots
            .iter()
            .map(|s| s.lock().expect("shot-state lock poisoned").clone())
            .collect()
    }

    /// Replace the whole sequence.
    ///
    /// # Panics
    /// Panics if `values.len()` differs from the slot count.
    pub fn store_all(&self, values: &[DVector<f64>]) {
        assert_eq!(values.len(), self.slots.len(), "shot-state length");
        for (slot, v) in self.slots.iter().zip(values) {
            *slot.lock().expect("shot-state lock poisoned") = v.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_validates_lengths() {
        let x = vec![DVector::zeros(2); 4];
        let u = vec![DVector::zeros(1); 3];
        let it = Iterate::from_parts(x, u);
        assert_eq!(it.horizon(), 3);
        assert_eq!(it.state_dim(), 2);
        assert_eq!(it.control_dim(), 1);
    }

    #[test]
    #[should_panic]
    fn from_parts_rejects_mismatch() {
        Iterate::from_parts(vec![DVector::zeros(2); 3], vec![DVector::zeros(1); 3]);
    }

    #[test]
    fn constant_guess_shapes() {
        let it = Iterate::constant(DVector::from_vec(vec![1.0, -1.0]), 1, 5);
        assert_eq!(it.x.len(), 6);
        assert_eq!(it.u.len(), 5);
        assert!(it.x.iter().all(|x| x[0] == 1.0 && x[1] == -1.0));
    }

    #[test]
    fn shot_states_store_and_snapshot() {
        let shots = ShotStates::new(2, 3);
        assert_eq!(shots.len(), 4);
        shots.store(2, &DVector::from_vec(vec![5.0, 6.0]));
        assert_eq!(shots.get(2), DVector::from_vec(vec![5.0, 6.0]));
        let snap = shots.snapshot();
        assert_eq!(snap[0], DVector::zeros(2));
        assert_eq!(snap[2], DVector::from_vec(vec![5.0, 6.0]));
    }
}
