//! Error types for rustmd-core.

use thiserror::Error;

/// Result type alias for rustmd operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for index construction and conversion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A named run property is missing or has the wrong kind.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// The target dimensionality is not supported by the selected mode.
    #[error("unsupported dimension count {ndims} for {mode} conversion")]
    UnsupportedDimension {
        /// Transform mode name.
        mode: &'static str,
        /// Requested number of dimensions.
        ndims: usize,
    },

    /// Requested functionality is declared but not implemented.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The target index is not shaped for the requested dimension count.
    #[error("target workspace has {actual} dimensions, conversion expects {expected}")]
    CastError {
        /// Dimension count the conversion was configured for.
        expected: usize,
        /// Dimension count of the index handed in.
        actual: usize,
    },

    /// A required scalar property is absent from the run metadata.
    #[error("missing property: {0}")]
    MissingProperty(String),

    /// Invalid argument (degenerate bounds, bad policy values, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Internal tree corruption.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
