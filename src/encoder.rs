//! Face Encoder collaborator.
//!
//! Decoding an image and embedding its faces happens outside this crate. The
//! pipeline only needs something that turns photo bytes into zero or more
//! fixed-length [`FeatureVector`]s.

use thiserror::Error;
use vector::FeatureVector;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EncoderError {
    /// The bytes could not be decoded as an image.
    #[error("failed to decode image: {0}")]
    Decode(String),
    /// The image decoded but face extraction failed.
    #[error("face extraction failed: {0}")]
    Extraction(String),
}

/// Extracts face embeddings from raw photo bytes.
///
/// Calls are blocking and CPU bound; the pipeline runs them on the blocking
/// pool and bounds how many run at once. An empty result means "no face".
pub trait FaceEncoder: Send + Sync {
    fn extract_faces(&self, image: &[u8]) -> Result<Vec<FeatureVector>, EncoderError>;

    /// Release buffers retained between calls. Invoked after every sub-batch.
    fn release_buffers(&self) {}
}

/// Encoder for photos whose payload already is the embeddings.
///
/// The payload is a flat run of little-endian `f32` values, `dimension` per
/// face. An empty payload has no faces. Used by the demo binary and tests.
#[derive(Debug, Clone)]
pub struct PrecomputedVectorEncoder {
    dimension: usize,
}

impl PrecomputedVectorEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Serialize faces into the payload format this encoder reads.
    pub fn encode_payload(faces: &[Vec<f32>]) -> Vec<u8> {
        faces
            .iter()
            .flatten()
            .flat_map(|value| value.to_le_bytes())
            .collect()
    }
}

impl FaceEncoder for PrecomputedVectorEncoder {
    fn extract_faces(&self, image: &[u8]) -> Result<Vec<FeatureVector>, EncoderError> {
        let face_bytes = self.dimension * 4;
        if face_bytes == 0 {
            return Err(EncoderError::Extraction("dimension is zero".into()));
        }
        if image.len() % face_bytes != 0 {
            return Err(EncoderError::Decode(format!(
                "payload of {} bytes is not a multiple of {face_bytes}",
                image.len()
            )));
        }

        let faces: Vec<FeatureVector> = image
            .chunks_exact(face_bytes)
            .map(|face| {
                FeatureVector::new(
                    face.chunks_exact(4)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                        .collect(),
                )
            })
            .collect();
        Ok(faces)
    }
}
