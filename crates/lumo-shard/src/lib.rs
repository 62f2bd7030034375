//! Follower-side shard runtime.
//!
//! A shard owns one flat vector index, the `vector_id → photo` mapping
//! table, and a directory of photo bytes, all rooted under the storage
//! path the leader hands out at registration. [`node::ShardNode`] drives
//! the protocol: register, heartbeat, and execute uploads and queries.

pub mod node;
pub mod runtime;
pub mod table;

pub use node::{ShardNode, ShardNodeConfig};
pub use runtime::ShardState;
pub use table::PhotoTable;

/// Shard-side errors.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error(transparent)]
    Vector(#[from] lumo_vector::VectorError),

    #[error(transparent)]
    Embed(#[from] lumo_core::embed::EmbedError),

    #[error(transparent)]
    Transport(#[from] lumo_proto::TransportError),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
