//! Nested-parallelism control for the dense-linear-algebra library.
//!
//! Phase workers already saturate the machine at per-index granularity, so
//! any threading *inside* the linear-algebra kernels (a threaded BLAS/LAPACK
//! backend, for instance) would oversubscribe it. The coordinator therefore
//! brackets every multi-index dispatch in an [`ExclusiveComputeRegion`] that
//! pins the library to one thread and restores the configured count when the
//! region is dropped — including on unwind, so a panicking phase cannot leave
//! the global toggle stuck.

use tracing::trace;

/// Abstraction over the linear-algebra library's global thread toggle.
///
/// Pure-Rust nalgebra kernels are single-threaded and use [`NoopLimiter`];
/// deployments linking a threaded BLAS implement this for their backend.
pub trait ParallelismLimiter: Send + Sync {
    /// Set the library's thread count.
    fn set_threads(&self, n: usize);
}

/// Limiter for backends with no internal threading to control.
pub struct NoopLimiter;

impl ParallelismLimiter for NoopLimiter {
    fn set_threads(&self, _n: usize) {}
}

/// Scoped suppression of linear-algebra threading.
///
/// Holds the library at one thread for the lifetime of the guard, then
/// restores the configured count (`n_threads_linalg` in the settings).
pub struct ExclusiveComputeRegion<'a> {
    limiter: &'a dyn ParallelismLimiter,
    restore: usize,
}

impl<'a> ExclusiveComputeRegion<'a> {
    pub fn enter(limiter: &'a dyn ParallelismLimiter, restore: usize) -> Self {
        trace!("restricting linear-algebra library to 1 thread");
        limiter.set_threads(1);
        Self { limiter, restore }
    }
}

impl Drop for ExclusiveComputeRegion<'_> {
    fn drop(&mut self) {
        trace!(threads = self.restore, "restoring linear-algebra thread count");
        self.limiter.set_threads(self.restore);
    }
}
