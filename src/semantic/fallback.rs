//! Deterministic, network-free embedding derived from hashed tokens.
//!
//! This is the last strategy of the embedding chain. It cannot fail: every
//! input, including text with no usable tokens, yields a finite unit vector.

use once_cell::sync::Lazy;
use regex::Regex;

use super::math::{normalize, rolling_hash};

/// Model tag recorded for vectors produced by [`HashEmbedder`].
pub const HASH_MODEL_TAG: &str = "local-hash-v1";

const TOKEN_WEIGHT: f32 = 0.3;
const REVERSED_TOKEN_WEIGHT: f32 = 0.2;
const LENGTH_SUFFIXED_WEIGHT: f32 = 0.1;

const JITTER_WEIGHT: f32 = 0.05;
const JITTER_STEP: usize = 10;
const JITTER_SPAN: usize = 100;

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s]").expect("punctuation pattern is valid"));

/// Hash-based embedder producing vectors of a fixed dimension.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed `text` into a unit-length vector.
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let dims = self.dimensions;
        let mut vector = vec![0.0f32; dims];

        for token in tokenize(text) {
            let reversed: String = token.chars().rev().collect();
            let suffixed = format!("{}{}", token, utf16_len(&token));

            vector[slot(&token, dims)] += TOKEN_WEIGHT;
            vector[slot(&reversed, dims)] += REVERSED_TOKEN_WEIGHT;
            vector[slot(&suffixed, dims)] += LENGTH_SUFFIXED_WEIGHT;
        }

        // lengths count UTF-16 code units, the same units `rolling_hash` reads
        let text_len = utf16_len(text);
        for i in (0..text_len.min(JITTER_SPAN)).step_by(JITTER_STEP) {
            vector[(text_len + i) % dims] += JITTER_WEIGHT;
        }

        normalize(&vector).unwrap_or_else(|| self.uniform())
    }

    /// Vector with every slot set to `1/sqrt(D)`.
    fn uniform(&self) -> Vec<f32> {
        vec![1.0 / (self.dimensions as f32).sqrt(); self.dimensions]
    }
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

fn slot(token: &str, dims: usize) -> usize {
    rolling_hash(token) as usize % dims
}

/// Lowercase, strip punctuation, keep tokens longer than two characters.
fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    PUNCTUATION
        .replace_all(&lowered, "")
        .split_whitespace()
        .filter(|t| t.chars().count() > 2)
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::math::{cosine_similarity, l2_norm};
    use crate::semantic::DIMENSIONS;

    #[test]
    fn test_tokenize_strips_punctuation_and_short_tokens() {
        let tokens = tokenize("Type-2 Diabetes: an overview, of it!");
        assert_eq!(tokens, vec!["type2", "diabetes", "overview"]);
    }

    #[test]
    fn test_output_is_unit_length() {
        let embedder = HashEmbedder::new(DIMENSIONS);
        let v = embedder.embed("insulin resistance and blood glucose");
        assert_eq!(v.len(), DIMENSIONS);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-4);
        assert!(v.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_deterministic() {
        let embedder = HashEmbedder::new(DIMENSIONS);
        let a = embedder.embed("hypertension management guidelines");
        let b = embedder.embed("hypertension management guidelines");
        assert_eq!(
            a.iter().map(|x| x.to_bits()).collect::<Vec<_>>(),
            b.iter().map(|x| x.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_short_tokens_only_still_unit_length() {
        // no token survives the filter, jitter alone carries the vector
        let embedder = HashEmbedder::new(DIMENSIONS);
        let v = embedder.embed("a b c");
        assert!((l2_norm(&v) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_shared_vocabulary_is_closer() {
        let embedder = HashEmbedder::new(DIMENSIONS);
        let query = embedder.embed("diabetes treatment options");
        let related = embedder.embed("treatment of diabetes with insulin");
        let unrelated = embedder.embed("fractured wrist rehabilitation exercises");

        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_jitter_counts_utf16_units() {
        let embedder = HashEmbedder::new(DIMENSIONS);

        // one char outside the BMP is two code units, so jitter lands on slot 2
        let astral = embedder.embed("\u{1D518}");
        assert!((astral[2] - 1.0).abs() < 1e-6);
        assert_eq!(astral.iter().filter(|x| **x != 0.0).count(), 1);

        let accented = embedder.embed("é");
        assert!((accented[1] - 1.0).abs() < 1e-6);

        let v = embedder.embed("café naïve résumé");
        assert!((l2_norm(&v) - 1.0).abs() < 1e-4);
        assert_eq!(v, embedder.embed("café naïve résumé"));
    }

    #[test]
    fn test_uniform_vector() {
        let embedder = HashEmbedder::new(4);
        assert_eq!(embedder.uniform(), vec![0.5; 4]);
    }
}
