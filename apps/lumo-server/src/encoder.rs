//! Feature-hashing encoder.
//!
//! Stands in for a neural embedding service behind the [`Embedder`] seam:
//! features (whitespace tokens for text, byte 4-grams for images) are
//! hashed into a fixed-dimension signed-count vector, then L2-normalized.
//! Deterministic across processes, so every shard agrees on the geometry.
//! A real encoder plugs in behind the same trait without touching the
//! cluster code.

use lumo_core::{EmbedError, Embedder};
use lumo_placement::xxhash64;

pub struct HashingEncoder {
    dimension: usize,
}

impl HashingEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8]) {
        let hash = xxhash64(feature);
        let bucket = (hash as usize) % self.dimension;
        // Top bit picks the sign so collisions partially cancel.
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    fn normalized(&self, mut vector: Vec<f32>) -> Result<Vec<f32>, EmbedError> {
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(EmbedError::Unsupported("input has no features".to_string()));
        }
        for v in &mut vector {
            *v /= norm;
        }
        Ok(vector)
    }
}

impl Embedder for HashingEncoder {
    fn encode_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError> {
        if bytes.is_empty() {
            return Err(EmbedError::Unsupported("empty image".to_string()));
        }
        let mut vector = vec![0.0; self.dimension];
        for window in bytes.windows(4.min(bytes.len())) {
            self.accumulate(&mut vector, window);
        }
        self.normalized(vector)
    }

    fn encode_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0; self.dimension];
        let mut seen = false;
        for token in text.split_whitespace() {
            seen = true;
            self.accumulate(&mut vector, token.to_lowercase().as_bytes());
        }
        if !seen {
            return Err(EmbedError::Unsupported("empty prompt".to_string()));
        }
        self.normalized(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
