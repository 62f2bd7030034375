//! Flat vector similarity index for Lumo shards.
//!
//! Each shard owns exactly one [`FlatIndex`]: a linear-scan nearest-neighbor
//! store over a fixed dimension and a single distance metric. Vector ids are
//! monotonically increasing integers starting at 0, assigned in insertion
//! order and reset only by [`FlatIndex::clear`].

pub mod distance;
pub mod flat;

pub use distance::{inner_product, squared_euclidean, DistanceMetric};
pub use flat::{FlatIndex, SearchSlot, NO_RESULT};

/// Result alias for vector index operations.
pub type Result<T> = std::result::Result<T, VectorError>;

/// Errors from vector index operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}
