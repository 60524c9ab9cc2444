use thiserror::Error;
use vector::VectorError;

/// Failures reported by a [`Repository`](crate::Repository) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("record not found: {0}")]
    NotFound(String),
}

impl RepositoryError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Errors raised while building or querying a similarity index.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// The probe or a stored vector failed validation.
    #[error("vector error: {0}")]
    Vector(#[from] VectorError),
    /// Fewer than two valid participants; callers treat this as a state, not a fault.
    #[error("index for event {event_id} is not built")]
    NotBuilt { event_id: String },
    /// Participant vectors could not be fetched for a build.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Validation failures at the participant ingestion boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParticipantError {
    #[error("participant record has no user_id")]
    MissingUserId,
    #[error("participant {user_id} has no reference vector")]
    MissingVector { user_id: String },
    #[error("participant {user_id} has an invalid reference vector: {source}")]
    InvalidVector {
        user_id: String,
        #[source]
        source: VectorError,
    },
}
