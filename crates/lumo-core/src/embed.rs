//! Embedding service interface.
//!
//! Text and image encoders live outside the core; shards call them through
//! this trait. The dimension is fixed for the lifetime of a configuration
//! and decides the vector index dimension on every shard.

use serde::{Deserialize, Serialize};

/// Embedding model configuration, chosen by the leader and handed to every
/// shard in the registration ack so all indices agree on the dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model identity, e.g. "ViT-B/32".
    pub model: String,
    /// Device hint, e.g. "cpu" or "cuda".
    pub device: String,
    /// Whether embeddings are L2-normalized.
    pub normalize: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "ViT-B/32".to_string(),
            device: "cpu".to_string(),
            normalize: true,
        }
    }
}

/// Errors from the embedding service.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("unsupported input: {0}")]
    Unsupported(String),
}

/// Text/image to vector encoder.
///
/// Calls are synchronous and CPU/GPU-bound; callers must not run them on a
/// task that also services heartbeats.
pub trait Embedder: Send + Sync {
    /// Encode raw image bytes into an embedding vector.
    fn encode_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError>;

    /// Encode a text prompt into an embedding vector.
    fn encode_text(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    /// The fixed embedding dimension.
    fn dimension(&self) -> usize;
}
