//! Shared types and collaborator interfaces for the Lumo photo index.
//!
//! The distributed core treats the embedding model, the metadata store, the
//! prompt extractor, and the EXIF extractor as black boxes reached through
//! the traits defined here. [`MemoryMetaStore`] is the bundled metadata
//! store implementation; a relational backend can be swapped in behind the
//! same trait.

pub mod embed;
pub mod exif;
pub mod meta;
pub mod prompt;
pub mod types;

pub use embed::{EmbedError, Embedder, EmbeddingConfig};
pub use exif::{NoopPhotoMetaExtractor, PhotoMeta, PhotoMetaExtractor};
pub use meta::{MemoryMetaStore, MetaError, MetaFilter, MetadataStore};
pub use prompt::{LocationMention, NoopPromptExtractor, PromptExtractor, PromptMeta};
pub use types::{GeoBox, PhotoRecord, ShardId, TimeRange, VectorEntry};
