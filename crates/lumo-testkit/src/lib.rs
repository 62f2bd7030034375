//! Stub collaborators and cluster assembly for Lumo tests.
//!
//! - [`stubs`]: a deterministic embedder and a scripted prompt extractor,
//!   so tests control exactly what the NLP/vision seams produce
//! - [`cluster`]: an in-process leader plus N shards wired over an
//!   in-memory transport mesh

pub mod cluster;
pub mod stubs;

pub use cluster::TestCluster;
pub use stubs::{ScriptedExtractor, ScriptedPhotoMeta, StubEmbedder};
