//! Centralized error handling for the solver backend, using `thiserror`.

use thiserror::Error;

/// Main error type for solver-backend operations.
#[derive(Error, Debug)]
pub enum SolverError {
    /// Configuration errors (invalid settings values).
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A solver algorithm variant that the backend does not implement.
    #[error("unknown algorithm variant '{0}' requested")]
    UnknownAlgorithm(String),

    /// Numerical integration diverged while propagating a shooting segment.
    ///
    /// Raised by the system model's `step` and surfaced from the shot-rollout
    /// dispatch; never retried by the backend.
    #[error("integration diverged at stage {stage}: {message}")]
    Integration { stage: usize, message: String },

    /// The external linear-quadratic backward solver failed.
    #[error("LQ backward solve failed: {0}")]
    Solve(String),
}

/// Type alias for Results using [`SolverError`].
pub type Result<T> = std::result::Result<T, SolverError>;

impl SolverError {
    /// Create a configuration error with a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an integration-divergence error at the given stage.
    pub fn integration(stage: usize, message: impl Into<String>) -> Self {
        Self::Integration {
            stage,
            message: message.into(),
        }
    }
}
