//! Deterministic stand-ins for the embedding and NLP seams.

use lumo_core::embed::{EmbedError, Embedder};
use lumo_core::exif::{PhotoMeta, PhotoMetaExtractor};
use lumo_core::prompt::{PromptExtractor, PromptMeta};
use lumo_placement::xxhash64;
use std::collections::HashMap;

/// Embedder producing a deterministic pseudo-random vector from the input
/// hash. Identical inputs embed identically; distinct inputs land far
/// apart with overwhelming probability, which is all similarity tests
/// need.
pub struct StubEmbedder {
    dimension: usize,
}

impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector_for(&self, bytes: &[u8]) -> Vec<f32> {
        let mut state = xxhash64(bytes) | 1;
        (0..self.dimension)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                // Top bits, mapped into [0, 1).
                (state >> 40) as f32 / (1u64 << 24) as f32
            })
            .collect()
    }
}

impl Embedder for StubEmbedder {
    fn encode_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError> {
        Ok(self.vector_for(bytes))
    }

    fn encode_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.vector_for(text.as_bytes()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Prompt extractor replaying scripted metadata, keyed by the exact
/// prompt. Unknown prompts extract nothing.
#[derive(Default)]
pub struct ScriptedExtractor {
    script: HashMap<String, PromptMeta>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, prompt: &str, meta: PromptMeta) -> Self {
        self.script.insert(prompt.to_string(), meta);
        self
    }
}

impl PromptExtractor for ScriptedExtractor {
    fn extract(&self, prompt: &str) -> PromptMeta {
        self.script.get(prompt).cloned().unwrap_or_default()
    }
}

/// EXIF extractor replaying scripted metadata, keyed by the exact photo
/// payload. Unscripted payloads carry no metadata.
#[derive(Default)]
pub struct ScriptedPhotoMeta {
    script: HashMap<Vec<u8>, PhotoMeta>,
}

impl ScriptedPhotoMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, payload: &[u8], meta: PhotoMeta) -> Self {
        self.script.insert(payload.to_vec(), meta);
        self
    }
}

impl PhotoMetaExtractor for ScriptedPhotoMeta {
    fn extract(&self, bytes: &[u8], _format: &str) -> PhotoMeta {
        self.script.get(bytes).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumo_core::types::TimeRange;

    #[test]
    fn test_stub_embedder_deterministic() {
        let embedder = StubEmbedder::new(8);
        let a = embedder.encode_image(b"photo").unwrap();
        let b = embedder.encode_image(b"photo").unwrap();
        let c = embedder.encode_image(b"other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
        assert!(a.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn test_scripted_extractor() {
        let extractor = ScriptedExtractor::new().with(
            "photos from 2020",
            PromptMeta {
                time_range: Some(TimeRange::new(1_577_836_800, 1_609_459_199)),
                time_weight: 1.0,
                ..Default::default()
            },
        );
        assert!(extractor.extract("photos from 2020").time_range.is_some());
        assert!(extractor.extract("anything else").is_empty());
    }
}
