//! Error type shared by every stage of an inference run.

use thiserror::Error;

/// Errors raised by the inference engine, its collaborators and the evaluation helpers.
#[derive(Error, Debug)]
pub enum SbiError {
    /// Invalid round or sample counts, unknown selector tokens, mismatched dimensions.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The posterior was requested before any round completed.
    #[error("no posterior available: run_inference has not completed a round yet")]
    NotFitted,

    /// The MMD statistic needs at least two samples on each side.
    #[error("insufficient samples: got m={m} and n={n}, need at least 2 in each set")]
    InsufficientSamples { m: usize, n: usize },

    /// Failure reported by a simulator.
    #[error("simulator error: {0}")]
    Simulator(String),

    /// Failure while fitting a density or ratio estimator.
    #[error("estimator fit error: {0}")]
    EstimatorFit(String),

    /// Array shape mismatch from `ndarray`.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error.
    #[cfg(feature = "csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SbiError>;
