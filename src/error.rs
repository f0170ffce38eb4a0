//! Error types for hierarchical sampling.
//!
//! Only conditions that stop a run are errors. A non-finite proposal is rejected
//! inside the kernel, and convergence problems are reported as
//! [`crate::stats::ConvergenceWarning`]s next to the draws.

use thiserror::Error;

/// Crate error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid model specification or sampler configuration.
    ///
    /// Always raised before the first iteration runs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No chain completed its warmup before it was cancelled or ran out of its time budget.
    #[error("sampling cancelled: {0}")]
    Cancelled(String),

    /// A parameter name that is not part of the model.
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writing error
    #[cfg(feature = "csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
