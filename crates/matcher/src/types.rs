use std::sync::Arc;

use index::{IndexError, Participant, RepositoryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vector::VectorError;

/// Confidence bucket attached to every accepted match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceTier {
    High,
    Medium,
}

impl ConfidenceTier {
    /// `High` when `similarity >= high_threshold`, otherwise `Medium`.
    pub fn for_similarity(similarity: f32, high_threshold: f32) -> Self {
        if similarity >= high_threshold {
            ConfidenceTier::High
        } else {
            ConfidenceTier::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::High => "High",
            ConfidenceTier::Medium => "Medium",
        }
    }
}

/// Which path produced a set of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPath {
    Indexed,
    BruteForce,
}

/// Matching knobs shared by the indexed and brute-force paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchConfig {
    /// Expected length of every reference and probe vector.
    #[serde(default = "MatchConfig::default_dimension")]
    pub dimension: usize,
    /// Threshold used when a caller does not pass one.
    #[serde(default = "MatchConfig::default_threshold")]
    pub default_threshold: f32,
    /// Accepted matches at or above this score are tiered `High`.
    #[serde(default = "MatchConfig::default_high_confidence")]
    pub high_confidence_threshold: f32,
    /// Candidates inspected per probe before thresholding.
    #[serde(default = "MatchConfig::default_max_candidates")]
    pub max_candidates: usize,
}

impl MatchConfig {
    pub(crate) fn default_dimension() -> usize {
        128
    }

    pub(crate) fn default_threshold() -> f32 {
        0.92
    }

    pub(crate) fn default_high_confidence() -> f32 {
        0.95
    }

    pub(crate) fn default_max_candidates() -> usize {
        5
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_default_threshold(mut self, threshold: f32) -> Self {
        self.default_threshold = threshold;
        self
    }

    pub fn with_high_confidence_threshold(mut self, threshold: f32) -> Self {
        self.high_confidence_threshold = threshold;
        self
    }

    pub fn with_max_candidates(mut self, max_candidates: usize) -> Self {
        self.max_candidates = max_candidates;
        self
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        if self.dimension == 0 {
            return Err(MatchError::InvalidConfig(
                "dimension must be greater than zero".into(),
            ));
        }
        if self.max_candidates == 0 {
            return Err(MatchError::InvalidConfig(
                "max_candidates must be greater than zero".into(),
            ));
        }
        validate_threshold("default_threshold", self.default_threshold)?;
        validate_threshold("high_confidence_threshold", self.high_confidence_threshold)
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            dimension: Self::default_dimension(),
            default_threshold: Self::default_threshold(),
            high_confidence_threshold: Self::default_high_confidence(),
            max_candidates: Self::default_max_candidates(),
        }
    }
}

pub(crate) fn validate_threshold(name: &str, value: f32) -> Result<(), MatchError> {
    if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
        return Err(MatchError::InvalidConfig(format!(
            "{name} must be within [-1.0, 1.0], got {value}"
        )));
    }
    Ok(())
}

/// One accepted candidate for a probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub user_id: String,
    pub name: String,
    /// Cosine similarity rounded to four decimal places.
    pub similarity: f32,
    pub confidence: ConfidenceTier,
    #[serde(skip_serializing)]
    pub participant: Arc<Participant>,
}

/// An accepted match tagged with the face it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceMatch {
    pub face_index: usize,
    #[serde(flatten)]
    pub result: MatchResult,
}

/// Outcome of trying the cached index for one probe.
///
/// Only `Found` is final; the other two send the caller to brute force.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexLookup {
    Found(Vec<MatchResult>),
    NotBuilt,
    Error(String),
}

/// Errors produced by the matching layer.
#[derive(Debug, Error)]
pub enum MatchError {
    /// Invalid configuration or threshold.
    #[error("invalid match config: {0}")]
    InvalidConfig(String),
    #[error("vector error: {0}")]
    Vector(#[from] VectorError),
    /// Participant vectors could not be loaded for the brute-force path.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
}
