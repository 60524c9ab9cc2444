use thiserror::Error;

/// Errors produced by vector primitives.
///
/// Both variants are local: callers skip the single comparison or participant
/// that produced them rather than aborting a larger operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VectorError {
    /// The vector cannot be used (zero norm, empty, or non-finite components).
    #[error("invalid vector: {0}")]
    InvalidVector(String),
    /// Two vectors that must share a dimensionality do not.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl VectorError {
    pub(crate) fn invalid<S: Into<String>>(reason: S) -> Self {
        VectorError::InvalidVector(reason.into())
    }
}
