//! Error types for spikesort-core.

use thiserror::Error;

/// Result type alias for spikesort operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for spike sorting operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A parameter or parameter combination is invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The requested cluster count does not fit the 8-bit cluster id space.
    #[error("capacity error: {requested} clusters requested, at most {max} addressable")]
    Capacity { requested: usize, max: usize },

    /// Two arrays that must agree in size do not.
    #[error("size mismatch for {what}: expected {expected}, got {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Input is empty, non-finite or otherwise carries no usable signal.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),
}

impl Error {
    /// Shorthand for a [`Error::SizeMismatch`].
    #[must_use]
    pub fn size_mismatch(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::SizeMismatch {
            what,
            expected,
            actual,
        }
    }

    /// Returns true for configuration-class errors.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Capacity { .. })
    }
}
