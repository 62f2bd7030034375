//! UDP heartbeat transport.
//!
//! Heartbeats are commutative, idempotent, and loss-tolerant, so they ride
//! a plain datagram socket. A lost heartbeat costs nothing; enough lost
//! heartbeats and the liveness sweep does its job.

use crate::message::Message;
use crate::transport::Transport;
use crate::TransportError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;

/// Heartbeat messages are tiny; anything near this size is not one.
const MAX_DATAGRAM_BYTES: usize = 16 * 1024;

/// Best-effort datagram transport.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind a datagram socket on `addr`.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, target: SocketAddr, msg: Message) -> Result<(), TransportError> {
        let body = msg.encode()?;
        self.socket
            .send_to(&body, target)
            .await
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", target, e)))?;
        Ok(())
    }

    async fn recv(&self) -> Result<(SocketAddr, Message), TransportError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        loop {
            let (n, peer) = self.socket.recv_from(&mut buf).await?;
            match Message::decode(&buf[..n]) {
                Ok(msg) => return Ok((peer, msg)),
                Err(e) => {
                    tracing::warn!("dropping malformed datagram from {}: {}", peer, e);
                }
            }
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
