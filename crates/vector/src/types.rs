use serde::{Deserialize, Serialize};

use crate::math::validate_vector;
use crate::VectorError;

/// Fixed-length embedding of one detected face.
///
/// The wrapper is transparent on the wire so repositories can persist the
/// raw float array.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check length and norm against the deployment dimensionality.
    pub fn validate(&self, expected_len: usize) -> Result<(), VectorError> {
        validate_vector(&self.0, expected_len)
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

impl AsRef<[f32]> for FeatureVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}
