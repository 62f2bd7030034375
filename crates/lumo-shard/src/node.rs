//! Shard node protocol loop.
//!
//! The node registers with the leader, initializes its local state from
//! the ack, then services control messages while a background task sends
//! heartbeats on the best-effort channel. Requests arriving before the
//! ack has initialized the state are logged and dropped. CPU-bound
//! embedding and index work runs on the blocking pool so the control loop
//! never starves the heartbeat task.

use crate::runtime::ShardState;
use crate::ShardError;
use lumo_core::exif::PhotoMetaExtractor;
use lumo_core::Embedder;
use lumo_proto::{Message, Transport, TransportError};
use lumo_vector::DistanceMetric;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Static configuration for a shard process.
#[derive(Debug, Clone)]
pub struct ShardNodeConfig {
    /// Leader control address to register with.
    pub leader_addr: SocketAddr,
    /// Leader heartbeat address on the best-effort channel.
    pub leader_heartbeat_addr: SocketAddr,
    pub heartbeat_interval: Duration,
    pub metric: DistanceMetric,
}

/// A follower node holding one shard.
pub struct ShardNode {
    config: ShardNodeConfig,
    control: Arc<dyn Transport>,
    heartbeats: Arc<dyn Transport>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn PhotoMetaExtractor>,
    /// Set once the register ack arrives; requests before that are dropped.
    state: RwLock<Option<Arc<ShardState>>>,
    shutdown: watch::Sender<bool>,
}

impl ShardNode {
    pub fn new(
        config: ShardNodeConfig,
        control: Arc<dyn Transport>,
        heartbeats: Arc<dyn Transport>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn PhotoMetaExtractor>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            control,
            heartbeats,
            embedder,
            extractor,
            state: RwLock::new(None),
            shutdown,
        }
    }

    /// Whether the register ack has initialized the local state.
    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    /// Number of vectors held by the local index; zero before init.
    pub fn indexed_count(&self) -> usize {
        self.state.read().as_ref().map_or(0, |state| state.len())
    }

    /// Register with the leader and service messages until `quit` or the
    /// transport closes.
    pub async fn run(self: Arc<Self>) -> Result<(), ShardError> {
        self.control
            .send(
                self.config.leader_addr,
                Message::Register {
                    addr: self.control.local_addr(),
                },
            )
            .await?;
        tracing::info!(leader = %self.config.leader_addr, "sent registration");

        loop {
            let (from, msg) = match self.control.recv().await {
                Ok(received) => received,
                Err(TransportError::Closed) => {
                    tracing::info!("control channel closed, shutting down");
                    let _ = self.shutdown.send(true);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("control recv failed: {}", e);
                    continue;
                }
            };
            match msg {
                Message::RegisterAck {
                    shard_id,
                    leader_addr,
                    embedding,
                    storage_root,
                } => {
                    tracing::info!(shard_id, model = embedding.model, "received register ack");
                    let state = {
                        let dimension = self.embedder.dimension();
                        let metric = self.config.metric;
                        tokio::task::spawn_blocking(move || {
                            ShardState::init(shard_id, leader_addr, &storage_root, dimension, metric)
                        })
                        .await?
                    }?;
                    let first = self.state.write().replace(Arc::new(state)).is_none();
                    if first {
                        self.spawn_heartbeats(shard_id);
                    }
                }
                Message::Upload {
                    photo_id,
                    name,
                    format,
                    payload,
                } => match self.state() {
                    Some(state) => {
                        let node = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                node.handle_upload(state, photo_id, name, format, payload).await
                            {
                                tracing::warn!("upload failed: {}", e);
                            }
                        });
                    }
                    None => tracing::warn!("upload before initialization, dropping"),
                },
                Message::Search {
                    request_id,
                    prompt,
                    query_vector,
                    top_k,
                } => self.spawn_query(request_id, prompt, query_vector, top_k, false),
                Message::Get {
                    request_id,
                    prompt,
                    query_vector,
                    top_k,
                    ..
                } => self.spawn_query(request_id, prompt, query_vector, top_k, true),
                Message::Clear => match self.state() {
                    Some(state) => {
                        let result = tokio::task::spawn_blocking(move || state.clear()).await;
                        match result {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => tracing::warn!("clear failed: {}", e),
                            Err(e) => tracing::warn!("clear task failed: {}", e),
                        }
                    }
                    None => tracing::warn!("clear before initialization, dropping"),
                },
                Message::Quit => {
                    tracing::info!("quit received, shutting down");
                    let _ = self.shutdown.send(true);
                    return Ok(());
                }
                other => {
                    tracing::warn!(%from, kind = other.kind(), "unexpected message at shard, dropping");
                }
            }
        }
    }

    fn state(&self) -> Option<Arc<ShardState>> {
        self.state.read().clone()
    }

    fn spawn_query(
        self: &Arc<Self>,
        request_id: String,
        prompt: String,
        query_vector: Option<Vec<f32>>,
        top_k: u32,
        with_payload: bool,
    ) {
        let state = match self.state() {
            Some(state) => state,
            None => {
                tracing::warn!("search before initialization, dropping");
                return;
            }
        };
        let node = self.clone();
        tokio::spawn(async move {
            if let Err(e) = node
                .handle_query(state, request_id, prompt, query_vector, top_k, with_payload)
                .await
            {
                tracing::warn!("search failed: {}", e);
            }
        });
    }

    fn spawn_heartbeats(&self, shard_id: lumo_core::ShardId) {
        let heartbeats = self.heartbeats.clone();
        let target = self.config.leader_heartbeat_addr;
        let interval = self.config.heartbeat_interval;
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = heartbeats.send(target, Message::Heartbeat { shard_id }).await {
                            tracing::debug!("heartbeat send failed: {}", e);
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    async fn handle_upload(
        &self,
        state: Arc<ShardState>,
        photo_id: String,
        name: String,
        format: String,
        payload: Vec<u8>,
    ) -> Result<(), ShardError> {
        let embedder = self.embedder.clone();
        let extractor = self.extractor.clone();
        let ingest_state = state.clone();
        let record = tokio::task::spawn_blocking(move || {
            ingest_state.ingest(
                embedder.as_ref(),
                extractor.as_ref(),
                &photo_id,
                &name,
                &format,
                &payload,
            )
        })
        .await??;
        self.control
            .send(
                state.leader_addr,
                Message::UploadReply {
                    shard_id: state.shard_id,
                    record,
                },
            )
            .await?;
        Ok(())
    }

    async fn handle_query(
        &self,
        state: Arc<ShardState>,
        request_id: String,
        prompt: String,
        query_vector: Option<Vec<f32>>,
        top_k: u32,
        with_payload: bool,
    ) -> Result<(), ShardError> {
        let embedder = self.embedder.clone();
        let query_state = state.clone();
        let results = tokio::task::spawn_blocking(move || -> Result<_, ShardError> {
            let query = match query_vector {
                Some(v) => v,
                None => embedder.encode_text(&prompt)?,
            };
            query_state.query(&query, top_k as usize, with_payload)
        })
        .await??;

        let reply = if with_payload {
            Message::GetResult {
                shard_id: state.shard_id,
                request_id,
                results,
            }
        } else {
            Message::SearchResult {
                shard_id: state.shard_id,
                request_id,
                results,
            }
        };
        self.control.send(state.leader_addr, reply).await?;
        Ok(())
    }
}
