//! Similarity math shared by the embedding generator, the indexes and the
//! brute-force scan.
//!
//! Policy for opposite-direction vectors: cosine similarity is clamped to
//! [0.0, 1.0], so a negative cosine ranks the same as an orthogonal vector.

use super::DIMENSIONS;

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// True when every component is finite.
pub fn is_finite_vector(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Scale a vector to unit length.
///
/// Returns `None` if the magnitude is zero or not finite.
pub fn normalize(v: &[f32]) -> Option<Vec<f32>> {
    let norm = l2_norm(v);
    if norm < f32::EPSILON || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

/// Cosine similarity between two embeddings, clamped to [0.0, 1.0].
///
/// Returns 0.0 when:
/// - the lengths differ, or differ from [`DIMENSIONS`]
/// - either vector has a non-finite component
/// - either magnitude is zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.len() != DIMENSIONS {
        return 0.0;
    }
    if !is_finite_vector(a) || !is_finite_vector(b) {
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let similarity = dot_product / (norm_a * norm_b);
    if !similarity.is_finite() {
        return 0.0;
    }

    similarity.clamp(0.0, 1.0)
}

/// 32-bit rolling hash over UTF-16 code units: `h = h * 31 + unit`.
///
/// Arithmetic wraps as a signed 32-bit integer and the absolute value is
/// returned, so the same text always lands on the same slots.
pub fn rolling_hash(s: &str) -> u32 {
    let h = s
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32));
    h.unsigned_abs()
}
