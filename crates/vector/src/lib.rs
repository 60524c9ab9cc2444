//! # Feature vectors (`vector`)
//!
//! Stateless numeric primitives shared by the index, matcher, and pipeline
//! crates. A [`FeatureVector`] is the fixed-length embedding a face encoder
//! produces for one detected face; dimensionality is fixed per deployment and
//! every pairwise operation rejects mismatched lengths.
//!
//! ```
//! use vector::{cosine_similarity, normalize, norm};
//!
//! let v = normalize(&[3.0, 4.0]).unwrap();
//! assert!((norm(&v) - 1.0).abs() < 1e-6);
//! let s = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
//! assert!((s - 1.0).abs() < 1e-6);
//! ```

mod error;
mod math;
mod types;

pub use crate::error::VectorError;
pub use crate::math::{cosine_similarity, dot, is_valid_vector, norm, normalize, validate_vector};
pub use crate::types::FeatureVector;
