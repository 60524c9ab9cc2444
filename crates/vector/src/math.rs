use crate::VectorError;

/// Euclidean (L2) norm. Accumulates in `f64` so long embeddings keep precision.
pub fn norm(v: &[f32]) -> f32 {
    v.iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt() as f32
}

/// Dot product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    check_dimensions(a, b)?;
    Ok(dot_f64(a, b) as f32)
}

/// Scale `v` to unit length.
///
/// Fails with [`VectorError::InvalidVector`] when the norm is zero or the
/// vector holds non-finite components.
pub fn normalize(v: &[f32]) -> Result<Vec<f32>, VectorError> {
    let n = checked_norm(v)?;
    Ok(v.iter().map(|x| (f64::from(*x) / n) as f32).collect())
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Fails with [`VectorError::DimensionMismatch`] on unequal lengths and with
/// [`VectorError::InvalidVector`] when either operand has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    check_dimensions(a, b)?;
    let norm_a = checked_norm(a)?;
    let norm_b = checked_norm(b)?;
    let similarity = dot_f64(a, b) / (norm_a * norm_b);
    Ok(similarity.clamp(-1.0, 1.0) as f32)
}

/// Precondition gate used before indexing or matching a vector.
pub fn is_valid_vector(v: &[f32], expected_len: usize) -> bool {
    validate_vector(v, expected_len).is_ok()
}

/// Like [`is_valid_vector`] but reports why the vector was rejected.
pub fn validate_vector(v: &[f32], expected_len: usize) -> Result<(), VectorError> {
    if v.len() != expected_len {
        return Err(VectorError::DimensionMismatch {
            expected: expected_len,
            got: v.len(),
        });
    }
    checked_norm(v).map(|_| ())
}

fn check_dimensions(a: &[f32], b: &[f32]) -> Result<(), VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    Ok(())
}

fn checked_norm(v: &[f32]) -> Result<f64, VectorError> {
    if v.is_empty() {
        return Err(VectorError::invalid("empty vector"));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(VectorError::invalid("non-finite component"));
    }
    let n = v
        .iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt();
    if n == 0.0 {
        return Err(VectorError::invalid("zero norm"));
    }
    Ok(n)
}

fn dot_f64(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}
