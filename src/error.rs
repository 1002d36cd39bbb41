//! Error types for index construction.
//!
//! Construction errors never escape the optimizer entry points: the
//! orchestrator logs them and moves on to the next candidate. They are
//! surfaced here as a proper error type so index factories can use `?`
//! internally and so callers constructing indexes directly get real
//! diagnostics.

use thiserror::Error;

/// Errors that can occur while constructing an index.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The dataset contains no records.
    #[error("dataset is empty")]
    EmptyDataset,

    /// A record or query does not match the dataset dimensionality.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A construction parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The distance function is not usable with this index structure.
    #[error("distance not supported by this index: {0}")]
    UnsupportedDistance(&'static str),

    /// Internal construction failure.
    #[error("construction failed: {0}")]
    Construction(String),
}

/// Result type for index construction.
pub type BuildResult<T> = Result<T, BuildError>;
