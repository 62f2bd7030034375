//! Wire protocol and transports for Lumo.
//!
//! All cluster communication is a tagged [`Message`] enum serialized with
//! bincode. Two channels exist: a reliable point-to-point control channel
//! (registration, uploads, queries, replies) and a best-effort channel for
//! heartbeats.
//!
//! # Modules
//!
//! - [`message`]: the message enum and encode/decode
//! - [`transport`]: transport trait + in-memory implementation for tests
//! - [`tcp`]: length-prefixed TCP control transport
//! - [`udp`]: datagram heartbeat transport

pub mod message;
pub mod tcp;
pub mod transport;
pub mod udp;

pub use message::{Message, MessageError, ShardHit};
pub use tcp::TcpTransport;
pub use transport::{create_transport_mesh, InMemoryTransport, Transport};
pub use udp::UdpTransport;

/// Transport-level errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("channel closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message error: {0}")]
    Message(#[from] MessageError),
}
