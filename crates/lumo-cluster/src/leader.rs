//! Leader node: listeners, liveness sweep, and the client-facing verbs.
//!
//! The leader runs three independent tasks: the control listener for
//! reliable messages (register, replies), the heartbeat listener on the
//! best-effort channel, and a periodic sweep that marks stale members dead
//! and expires overdue gather requests. Ingestion and query embedding are
//! CPU-bound and run on the blocking pool so the listeners stay
//! responsive.
//!
//! Finalized searches are delivered on an mpsc channel; the shell (or a
//! test) owns the receiving end.

use crate::coordinator::{FinalizedSearch, QueryCoordinator, SearchMode, SearchPlan};
use crate::member::{MemberStatus, MemberTable};
use crate::router::{RouteError, UploadOutcome, UploadRouter};
use lumo_core::embed::{EmbedError, Embedder, EmbeddingConfig};
use lumo_core::meta::MetadataStore;
use lumo_core::prompt::PromptExtractor;
use lumo_core::ShardId;
use lumo_proto::{Message, Transport, TransportError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Leader configuration shared with shards at registration.
#[derive(Debug, Clone)]
pub struct LeaderConfig {
    /// A member whose last heartbeat is older than this is marked dead.
    pub heartbeat_timeout: Duration,
    /// How often the liveness sweep runs.
    pub sweep_interval: Duration,
    /// Embedding setup every shard must agree on.
    pub embedding: EmbeddingConfig,
    /// Root directory shards store photo bytes and index state under.
    pub storage_root: PathBuf,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(2),
            embedding: EmbeddingConfig::default(),
            storage_root: PathBuf::from("lumo-data"),
        }
    }
}

/// Leader-side errors surfaced to the shell.
#[derive(Debug, thiserror::Error)]
pub enum LeaderError {
    #[error("no shards registered")]
    NoMembers,

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The leader node.
pub struct LeaderNode {
    config: LeaderConfig,
    members: Arc<MemberTable>,
    store: Arc<dyn MetadataStore>,
    coordinator: Arc<QueryCoordinator>,
    router: UploadRouter,
    control: Arc<dyn Transport>,
    heartbeats: Arc<dyn Transport>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn PromptExtractor>,
    results_tx: mpsc::Sender<FinalizedSearch>,
}

impl LeaderNode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: LeaderConfig,
        store: Arc<dyn MetadataStore>,
        coordinator: Arc<QueryCoordinator>,
        control: Arc<dyn Transport>,
        heartbeats: Arc<dyn Transport>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn PromptExtractor>,
        results_tx: mpsc::Sender<FinalizedSearch>,
    ) -> Self {
        let members = Arc::new(MemberTable::new());
        let router = UploadRouter::new(members.clone(), store.clone(), control.clone());
        Self {
            config,
            members,
            store,
            coordinator,
            router,
            control,
            heartbeats,
            embedder,
            extractor,
            results_tx,
        }
    }

    pub fn members(&self) -> &Arc<MemberTable> {
        &self.members
    }

    /// Spawn the control listener, heartbeat listener, and liveness sweep.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let control = {
            let node = self.clone();
            tokio::spawn(async move { node.control_loop().await })
        };
        let heartbeat = {
            let node = self.clone();
            tokio::spawn(async move { node.heartbeat_loop().await })
        };
        let sweep = {
            let node = self.clone();
            tokio::spawn(async move { node.sweep_loop().await })
        };
        vec![control, heartbeat, sweep]
    }

    async fn control_loop(&self) {
        loop {
            match self.control.recv().await {
                Ok((from, msg)) => self.handle_control(from, msg).await,
                Err(TransportError::Closed) => {
                    tracing::info!("control channel closed, stopping listener");
                    return;
                }
                Err(e) => tracing::warn!("control recv failed: {}", e),
            }
        }
    }

    async fn heartbeat_loop(&self) {
        loop {
            match self.heartbeats.recv().await {
                Ok((_, Message::Heartbeat { shard_id })) => {
                    if !self.members.heartbeat(shard_id) {
                        tracing::warn!(shard_id, "heartbeat from unknown shard");
                    }
                }
                Ok((from, msg)) => {
                    tracing::warn!(%from, kind = msg.kind(), "non-heartbeat on heartbeat channel");
                }
                Err(TransportError::Closed) => return,
                Err(e) => tracing::warn!("heartbeat recv failed: {}", e),
            }
        }
    }

    async fn sweep_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        loop {
            ticker.tick().await;
            for shard_id in self.members.sweep(self.config.heartbeat_timeout) {
                tracing::info!(shard_id, "member missed heartbeat timeout, marked dead");
            }
            for finalized in self.coordinator.expire(self.store.as_ref()) {
                self.deliver(finalized).await;
            }
        }
    }

    async fn handle_control(&self, from: SocketAddr, msg: Message) {
        match msg {
            Message::Register { addr } => self.handle_register(addr).await,
            Message::UploadReply { shard_id, record } => {
                let name = record.name.clone();
                match self.store.insert(record) {
                    Ok(()) => tracing::info!(shard_id, name, "recorded photo metadata"),
                    Err(e) => tracing::warn!(shard_id, name, "metadata insert failed: {}", e),
                }
            }
            Message::SearchResult {
                shard_id,
                request_id,
                results,
            }
            | Message::GetResult {
                shard_id,
                request_id,
                results,
            } => {
                if let Some(finalized) =
                    self.coordinator
                        .on_reply(shard_id, &request_id, results, self.store.as_ref())
                {
                    self.deliver(finalized).await;
                }
            }
            Message::Heartbeat { shard_id } => {
                // Tolerated on the control channel, same effect.
                self.members.heartbeat(shard_id);
            }
            other => {
                tracing::warn!(%from, kind = other.kind(), "unexpected message at leader, dropping");
            }
        }
    }

    async fn handle_register(&self, addr: SocketAddr) {
        let outcome = self.members.register(addr);
        let ack = Message::RegisterAck {
            shard_id: outcome.shard_id,
            leader_addr: self.control.local_addr(),
            embedding: self.config.embedding.clone(),
            storage_root: self.config.storage_root.clone(),
        };
        if let Err(e) = self.control.send(addr, ack).await {
            tracing::warn!(shard_id = outcome.shard_id, %addr, "register ack failed: {}", e);
            self.members.mark_dead(outcome.shard_id);
        }
        // Replay what was staged while the member was dead, in order.
        for msg in outcome.replay {
            self.send_or_stage(outcome.shard_id, msg).await;
        }
    }

    async fn send_or_stage(&self, shard_id: ShardId, msg: Message) {
        if self.members.status_of(shard_id) == Some(MemberStatus::Alive) {
            if let Some(addr) = self.members.addr_of(shard_id) {
                match self.control.send(addr, msg.clone()).await {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::warn!(shard_id, %addr, "send failed: {}", e);
                        self.members.mark_dead(shard_id);
                    }
                }
            }
        }
        self.members.stage(shard_id, msg);
    }

    async fn deliver(&self, finalized: FinalizedSearch) {
        if let Some(dir) = finalized.output_dir.clone() {
            if let Err(e) = self.save_payloads(&dir, &finalized).await {
                tracing::warn!(path = %dir.display(), "saving photos failed: {}", e);
            }
        }
        if self.results_tx.send(finalized).await.is_err() {
            tracing::warn!("result receiver dropped");
        }
    }

    async fn save_payloads(
        &self,
        dir: &std::path::Path,
        finalized: &FinalizedSearch,
    ) -> std::io::Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        for ranked in &finalized.ranked {
            let hit = finalized
                .hits
                .iter()
                .find(|h| h.photo_id == ranked.photo_id && h.payload.is_some());
            if let Some(hit) = hit {
                if let Some(payload) = &hit.payload {
                    tokio::fs::write(dir.join(&hit.name), payload).await?;
                }
            }
        }
        Ok(())
    }

    /// Route one photo to its shard.
    pub async fn upload(
        &self,
        name: &str,
        format: &str,
        payload: Vec<u8>,
    ) -> Result<UploadOutcome, LeaderError> {
        Ok(self.router.route(name, format, payload).await?)
    }

    /// Run a search. The finalized result arrives on the results channel;
    /// metadata-only and empty plans are delivered immediately.
    pub async fn search(&self, prompt: &str, mode: SearchMode) -> Result<(), LeaderError> {
        self.issue(prompt, mode, None).await
    }

    /// Like [`LeaderNode::search`] in meta-fusion mode, but shards inline
    /// photo bytes and the leader writes the ranked photos to `output_dir`.
    pub async fn get(&self, prompt: &str, output_dir: PathBuf) -> Result<(), LeaderError> {
        self.issue(prompt, SearchMode::MetaFusion, Some(output_dir))
            .await
    }

    async fn issue(
        &self,
        prompt: &str,
        mode: SearchMode,
        output_dir: Option<PathBuf>,
    ) -> Result<(), LeaderError> {
        if self.members.is_empty() {
            return Err(LeaderError::NoMembers);
        }
        let meta = self.extractor.extract(prompt);
        let plan = self.coordinator.plan(
            prompt,
            &meta,
            mode,
            output_dir.clone(),
            &self.members,
            self.store.as_ref(),
        );
        match plan {
            SearchPlan::Empty => {
                self.deliver(FinalizedSearch {
                    request_id: "local".to_string(),
                    prompt: prompt.to_string(),
                    mode,
                    ranked: Vec::new(),
                    hits: Vec::new(),
                    w_m: 0.0,
                    w_v: 0.0,
                    output_dir,
                    partial: false,
                })
                .await;
                Ok(())
            }
            SearchPlan::Local(ids) => {
                self.deliver(FinalizedSearch {
                    request_id: "local".to_string(),
                    prompt: prompt.to_string(),
                    mode,
                    ranked: ids
                        .into_iter()
                        .map(|photo_id| lumo_fusion::scorer::RankedPhoto {
                            photo_id,
                            score: 1.0,
                        })
                        .collect(),
                    hits: Vec::new(),
                    w_m: 1.0,
                    w_v: 0.0,
                    output_dir,
                    partial: false,
                })
                .await;
                Ok(())
            }
            SearchPlan::Scatter(scatter) => {
                let embedder = self.embedder.clone();
                let text = prompt.to_string();
                let query_vector =
                    tokio::task::spawn_blocking(move || embedder.encode_text(&text)).await??;

                for (shard_id, k) in scatter.targets {
                    let msg = match &output_dir {
                        Some(dir) => Message::Get {
                            request_id: scatter.request_id.clone(),
                            prompt: prompt.to_string(),
                            query_vector: Some(query_vector.clone()),
                            top_k: k,
                            output_dir: dir.clone(),
                        },
                        None => Message::Search {
                            request_id: scatter.request_id.clone(),
                            prompt: prompt.to_string(),
                            query_vector: Some(query_vector.clone()),
                            top_k: k,
                        },
                    };
                    self.send_or_stage(shard_id, msg).await;
                }
                Ok(())
            }
        }
    }

    /// Wipe the global metadata store and ask alive shards to wipe their
    /// local state. Best-effort per shard, sequentially consistent within
    /// each shard, not transactional across the cluster.
    pub async fn clear(&self) {
        self.store.delete_all();
        tracing::info!("cleared metadata store");
        for (shard_id, addr) in self.members.alive() {
            if let Err(e) = self.control.send(addr, Message::Clear).await {
                tracing::warn!(shard_id, "clear send failed: {}", e);
                self.members.mark_dead(shard_id);
            }
        }
    }

    /// Membership snapshot for `ls`.
    pub fn ls(&self) -> Vec<crate::member::MemberInfo> {
        self.members.snapshot()
    }

    /// Ask every alive shard to shut down.
    pub async fn quit(&self) {
        for (shard_id, addr) in self.members.alive() {
            if let Err(e) = self.control.send(addr, Message::Quit).await {
                tracing::warn!(shard_id, "quit send failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{CoordinatorConfig, WaitForAll};
    use lumo_core::meta::MemoryMetaStore;
    use lumo_core::prompt::PromptMeta;
    use lumo_core::PhotoRecord;
    use lumo_proto::transport::{create_transport_mesh, InMemoryTransport};

    struct FixedEmbedder(usize);

    impl Embedder for FixedEmbedder {
        fn encode_image(&self, _bytes: &[u8]) -> Result<Vec<f32>, EmbedError> {
            Ok(vec![0.5; self.0])
        }
        fn encode_text(&self, _text: &str) -> Result<Vec<f32>, EmbedError> {
            Ok(vec![0.5; self.0])
        }
        fn dimension(&self) -> usize {
            self.0
        }
    }

    struct NoMetaExtractor;

    impl PromptExtractor for NoMetaExtractor {
        fn extract(&self, _prompt: &str) -> PromptMeta {
            PromptMeta::default()
        }
    }

    struct Fixture {
        node: Arc<LeaderNode>,
        results_rx: mpsc::Receiver<FinalizedSearch>,
        mesh: std::collections::HashMap<SocketAddr, Arc<InMemoryTransport>>,
        addrs: Vec<SocketAddr>,
    }

    fn fixture(shards: u16) -> Fixture {
        // Slot 0 = leader control, slot 1 = leader heartbeats, rest shards.
        let addrs: Vec<SocketAddr> = (0..shards + 2)
            .map(|i| format!("127.0.0.1:{}", 9300 + i).parse().unwrap())
            .collect();
        let mesh = create_transport_mesh(addrs.clone());
        let (results_tx, results_rx) = mpsc::channel(16);
        let coordinator = Arc::new(QueryCoordinator::new(
            CoordinatorConfig::default(),
            Box::new(WaitForAll),
        ));
        let node = Arc::new(LeaderNode::new(
            LeaderConfig::default(),
            Arc::new(MemoryMetaStore::new()),
            coordinator,
            mesh[&addrs[0]].clone(),
            mesh[&addrs[1]].clone(),
            Arc::new(FixedEmbedder(8)),
            Arc::new(NoMetaExtractor),
            results_tx,
        ));
        Fixture {
            node,
            results_rx,
            mesh,
            addrs,
        }
    }

    #[tokio::test]
    async fn test_register_handshake_acks_with_config() {
        let f = fixture(1);
        let shard_addr = f.addrs[2];

        f.node
            .handle_control(shard_addr, Message::Register { addr: shard_addr })
            .await;

        let (_, msg) = f.mesh[&shard_addr].recv().await.unwrap();
        match msg {
            Message::RegisterAck {
                shard_id,
                leader_addr,
                embedding,
                ..
            } => {
                assert_eq!(shard_id, 0);
                assert_eq!(leader_addr, f.addrs[0]);
                assert_eq!(embedding, EmbeddingConfig::default());
            }
            other => panic!("expected ack, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reregister_replays_staged_messages() {
        let f = fixture(1);
        let shard_addr = f.addrs[2];

        f.node
            .handle_control(shard_addr, Message::Register { addr: shard_addr })
            .await;
        let _ack = f.mesh[&shard_addr].recv().await.unwrap();

        f.node.members.mark_dead(0);
        let staged = Message::Upload {
            photo_id: "p1".into(),
            name: "a.jpg".into(),
            format: "jpeg".into(),
            payload: vec![1],
        };
        f.node.members.stage(0, staged.clone());

        f.node
            .handle_control(shard_addr, Message::Register { addr: shard_addr })
            .await;
        let (_, ack) = f.mesh[&shard_addr].recv().await.unwrap();
        assert!(matches!(ack, Message::RegisterAck { shard_id: 0, .. }));
        let (_, replayed) = f.mesh[&shard_addr].recv().await.unwrap();
        assert_eq!(replayed, staged);
    }

    #[tokio::test]
    async fn test_upload_reply_records_metadata() {
        let f = fixture(1);
        let record = PhotoRecord::new("p1", 0, "a.jpg");
        f.node
            .handle_control(
                f.addrs[2],
                Message::UploadReply {
                    shard_id: 0,
                    record: record.clone(),
                },
            )
            .await;
        assert!(f.node.store.exists("p1"));
    }

    #[tokio::test]
    async fn test_search_without_members_fails() {
        let f = fixture(0);
        assert!(matches!(
            f.node.search("sunset", SearchMode::VectorOnly).await,
            Err(LeaderError::NoMembers)
        ));
    }

    #[tokio::test]
    async fn test_scatter_and_gather_delivers_result() {
        let mut f = fixture(2);
        for &shard_addr in &f.addrs[2..4] {
            f.node
                .handle_control(shard_addr, Message::Register { addr: shard_addr })
                .await;
            let _ack = f.mesh[&shard_addr].recv().await.unwrap();
        }

        f.node.search("sunset", SearchMode::VectorOnly).await.unwrap();

        // Each shard receives the query and replies.
        for (i, &shard_addr) in f.addrs[2..4].iter().enumerate() {
            let (_, msg) = f.mesh[&shard_addr].recv().await.unwrap();
            let request_id = match msg {
                Message::Search {
                    request_id,
                    query_vector,
                    ..
                } => {
                    assert_eq!(query_vector.unwrap().len(), 8);
                    request_id
                }
                other => panic!("expected search, got {:?}", other),
            };
            f.node
                .handle_control(
                    shard_addr,
                    Message::SearchResult {
                        shard_id: i as ShardId,
                        request_id,
                        results: vec![lumo_proto::ShardHit {
                            vector_id: 0,
                            score: 0.1 * (i + 1) as f32,
                            photo_id: format!("p{i}"),
                            name: format!("p{i}.jpg"),
                            format: "jpeg".into(),
                            payload: None,
                        }],
                    },
                )
                .await;
        }

        let finalized = f.results_rx.recv().await.unwrap();
        assert_eq!(finalized.ranked.len(), 2);
        assert_eq!(finalized.ranked[0].photo_id, "p0");
    }

    #[tokio::test]
    async fn test_clear_wipes_store_and_notifies_alive_shards() {
        let f = fixture(1);
        let shard_addr = f.addrs[2];
        f.node
            .handle_control(shard_addr, Message::Register { addr: shard_addr })
            .await;
        let _ack = f.mesh[&shard_addr].recv().await.unwrap();
        f.node.store.insert(PhotoRecord::new("p1", 0, "a.jpg")).unwrap();

        f.node.clear().await;
        assert!(f.node.store.is_empty());
        let (_, msg) = f.mesh[&shard_addr].recv().await.unwrap();
        assert_eq!(msg, Message::Clear);
    }
}
