//! Cluster protocol messages.
//!
//! One enum covers both directions: leader→shard (upload, search, clear,
//! quit, register ack) and shard→leader (register, heartbeat, replies).
//! Receivers match exhaustively and log-and-drop kinds that make no sense
//! for their role; a malformed frame fails decode and is likewise dropped
//! by the listener, never a crash.

use lumo_core::{EmbeddingConfig, PhotoRecord, ShardId};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// One partial result from a shard's local vector search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardHit {
    /// Shard-local vector id.
    pub vector_id: i64,
    /// Raw score under the shard index's metric (best-first convention).
    pub score: f32,
    pub photo_id: String,
    pub name: String,
    pub format: String,
    /// Original photo bytes, inlined only for `get` requests.
    pub payload: Option<Vec<u8>>,
}

/// Cluster protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Shard announces itself to the leader. Idempotent by address.
    Register { addr: SocketAddr },

    /// Leader acknowledges a registration with the assigned shard id and
    /// the shared configuration the shard needs to initialize its index.
    RegisterAck {
        shard_id: ShardId,
        leader_addr: SocketAddr,
        embedding: EmbeddingConfig,
        storage_root: PathBuf,
    },

    /// Best-effort liveness beacon, sent on the unreliable channel.
    Heartbeat { shard_id: ShardId },

    /// Ingestion request routed to exactly one shard.
    Upload {
        photo_id: String,
        name: String,
        format: String,
        payload: Vec<u8>,
    },

    /// Shard's ingestion ack carrying the merged metadata record.
    UploadReply {
        shard_id: ShardId,
        record: PhotoRecord,
    },

    /// Vector query fanned out by the coordinator.
    Search {
        request_id: String,
        prompt: String,
        /// Query embedding computed once by the leader; a shard encodes the
        /// prompt itself when this is absent.
        query_vector: Option<Vec<f32>>,
        top_k: u32,
    },

    /// Like [`Message::Search`] but replies inline the photo bytes so the
    /// leader can save them under the output directory.
    Get {
        request_id: String,
        prompt: String,
        query_vector: Option<Vec<f32>>,
        top_k: u32,
        output_dir: PathBuf,
    },

    /// Partial results for a search request.
    SearchResult {
        shard_id: ShardId,
        request_id: String,
        results: Vec<ShardHit>,
    },

    /// Partial results for a get request, payloads inlined.
    GetResult {
        shard_id: ShardId,
        request_id: String,
        results: Vec<ShardHit>,
    },

    /// Wipe the shard's index, mapping table, and photo files.
    Clear,

    /// Graceful shard shutdown.
    Quit,
}

impl Message {
    /// Encode the message to bytes using bincode.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        bincode::serialize(self).map_err(|e| MessageError::Serialization(e.to_string()))
    }

    /// Decode a message from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        bincode::deserialize(bytes).map_err(|e| MessageError::Deserialization(e.to_string()))
    }

    /// Short kind name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Register { .. } => "register",
            Message::RegisterAck { .. } => "register_ack",
            Message::Heartbeat { .. } => "heartbeat",
            Message::Upload { .. } => "upload",
            Message::UploadReply { .. } => "upload_reply",
            Message::Search { .. } => "search",
            Message::Get { .. } => "get",
            Message::SearchResult { .. } => "search_result",
            Message::GetResult { .. } => "get_result",
            Message::Clear => "clear",
            Message::Quit => "quit",
        }
    }
}

/// Message encoding/decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("oversized frame: {0} bytes")]
    Oversized(usize),
}
