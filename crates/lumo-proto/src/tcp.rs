//! TCP control-channel transport.
//!
//! One length-prefixed frame per connection, mirroring the one-shot
//! request style of the wire protocol: `send` dials the target, writes a
//! u32 big-endian length followed by the bincode body, and closes. An
//! accept loop decodes inbound frames and feeds them to `recv`; malformed
//! frames are logged and dropped without disturbing the loop.

use crate::message::{Message, MessageError};
use crate::transport::Transport;
use crate::TransportError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Refuse frames above this size (largest legitimate frame is an upload
/// payload; 64 MiB leaves generous headroom).
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// TCP transport for the reliable control channel.
pub struct TcpTransport {
    local_addr: SocketAddr,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<(SocketAddr, Message)>>>,
}

impl TcpTransport {
    /// Bind a listener on `addr` and start the accept loop.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(accept_loop(listener, tx));

        Ok(Self {
            local_addr,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        })
    }
}

async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<(SocketAddr, Message)>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
                continue;
            }
        };
        let tx = tx.clone();
        tokio::spawn(async move {
            match read_frame(stream).await {
                Ok(msg) => {
                    let _ = tx.send((peer, msg)).await;
                }
                Err(e) => {
                    tracing::warn!("dropping malformed frame from {}: {}", peer, e);
                }
            }
        });
    }
}

async fn read_frame(mut stream: TcpStream) -> Result<Message, TransportError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::Message(MessageError::Oversized(len)));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(Message::decode(&body)?)
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, target: SocketAddr, msg: Message) -> Result<(), TransportError> {
        let body = msg.encode()?;
        let mut stream = TcpStream::connect(target)
            .await
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", target, e)))?;
        stream
            .write_all(&(body.len() as u32).to_be_bytes())
            .await?;
        stream.write_all(&body).await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<(SocketAddr, Message), TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
