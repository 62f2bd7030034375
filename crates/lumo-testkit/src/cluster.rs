//! One leader plus N shards assembled in-process over the in-memory
//! transport mesh.
//!
//! Shards register sequentially so shard ids are deterministic: shard `i`
//! always ends up with id `i`. Timings are aggressive (tens of
//! milliseconds) so liveness tests finish quickly.

use crate::stubs::{ScriptedExtractor, StubEmbedder};
use lumo_cluster::{
    CoordinatorConfig, FinalizedSearch, GatherPolicy, LeaderConfig, LeaderNode, MemberStatus,
    QueryCoordinator, SearchMode, UploadOutcome, WaitForAll,
};
use lumo_core::exif::{NoopPhotoMetaExtractor, PhotoMetaExtractor};
use lumo_core::meta::{MemoryMetaStore, MetadataStore};
use lumo_core::prompt::PromptExtractor;
use lumo_proto::transport::{create_transport_mesh, InMemoryTransport};
use lumo_shard::{ShardNode, ShardNodeConfig};
use lumo_vector::DistanceMetric;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Embedding dimension used by the stub embedder across the cluster.
pub const DIMENSION: usize = 8;

const WAIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(10);

pub struct TestClusterBuilder {
    shards: usize,
    prompt_extractor: Arc<dyn PromptExtractor>,
    photo_extractor: Arc<dyn PhotoMetaExtractor>,
    policy: Option<Box<dyn GatherPolicy>>,
    coordinator: CoordinatorConfig,
    heartbeat_timeout: Duration,
}

impl TestClusterBuilder {
    pub fn prompt_extractor(mut self, extractor: Arc<dyn PromptExtractor>) -> Self {
        self.prompt_extractor = extractor;
        self
    }

    pub fn photo_extractor(mut self, extractor: Arc<dyn PhotoMetaExtractor>) -> Self {
        self.photo_extractor = extractor;
        self
    }

    pub fn gather_policy(mut self, policy: Box<dyn GatherPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn coordinator(mut self, config: CoordinatorConfig) -> Self {
        self.coordinator = config;
        self
    }

    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub async fn start(self) -> TestCluster {
        // Slot 0 = leader control, slot 1 = leader heartbeats, then one
        // control/heartbeat pair per shard.
        let addrs: Vec<SocketAddr> = (0..2 + 2 * self.shards)
            .map(|i| format!("127.0.0.1:{}", 7100 + i).parse().unwrap())
            .collect();
        let mesh = create_transport_mesh(addrs.clone());
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryMetaStore::new());
        let (results_tx, results) = mpsc::channel(64);

        let coordinator = Arc::new(QueryCoordinator::new(
            self.coordinator,
            self.policy.unwrap_or(Box::new(WaitForAll)),
        ));
        let leader = Arc::new(LeaderNode::new(
            LeaderConfig {
                heartbeat_timeout: self.heartbeat_timeout,
                sweep_interval: Duration::from_millis(50),
                storage_root: tmp.path().join("data"),
                ..LeaderConfig::default()
            },
            store.clone(),
            coordinator,
            mesh[&addrs[0]].clone(),
            mesh[&addrs[1]].clone(),
            Arc::new(StubEmbedder::new(DIMENSION)),
            self.prompt_extractor,
            results_tx,
        ));
        leader.spawn();

        let mut cluster = TestCluster {
            leader,
            store,
            results,
            shards: Vec::new(),
            mesh,
            addrs,
            _tmp: tmp,
        };
        for i in 0..self.shards {
            cluster.spawn_shard(i, self.photo_extractor.clone()).await;
        }
        cluster
    }
}

pub struct TestCluster {
    pub leader: Arc<LeaderNode>,
    pub store: Arc<MemoryMetaStore>,
    results: mpsc::Receiver<FinalizedSearch>,
    shards: Vec<Arc<ShardNode>>,
    mesh: HashMap<SocketAddr, Arc<InMemoryTransport>>,
    addrs: Vec<SocketAddr>,
    _tmp: tempfile::TempDir,
}

impl TestCluster {
    pub fn builder(shards: usize) -> TestClusterBuilder {
        TestClusterBuilder {
            shards,
            prompt_extractor: Arc::new(ScriptedExtractor::new()),
            photo_extractor: Arc::new(NoopPhotoMetaExtractor),
            policy: None,
            coordinator: CoordinatorConfig::default(),
            heartbeat_timeout: Duration::from_millis(250),
        }
    }

    /// Start a cluster with default stubs: no prompt metadata, no EXIF,
    /// wait-for-all gathering.
    pub async fn start(shards: usize) -> Self {
        Self::builder(shards).start().await
    }

    /// Spawn one more shard and wait until it has registered and
    /// initialized, so ids stay in spawn order.
    pub async fn spawn_shard(&mut self, index: usize, extractor: Arc<dyn PhotoMetaExtractor>) {
        let control = self.mesh[&self.addrs[2 + 2 * index]].clone();
        let heartbeats = self.mesh[&self.addrs[3 + 2 * index]].clone();
        let node = Arc::new(ShardNode::new(
            ShardNodeConfig {
                leader_addr: self.addrs[0],
                leader_heartbeat_addr: self.addrs[1],
                heartbeat_interval: Duration::from_millis(25),
                metric: DistanceMetric::SquaredEuclidean,
            },
            control,
            heartbeats,
            Arc::new(StubEmbedder::new(DIMENSION)),
            extractor,
        ));
        tokio::spawn(node.clone().run());
        let init = async {
            while !node.is_initialized() {
                tokio::time::sleep(POLL).await;
            }
        };
        timeout(WAIT, init).await.expect("shard failed to initialize");
        if index >= self.shards.len() {
            self.shards.push(node);
        } else {
            self.shards[index] = node;
        }
    }

    pub fn shard(&self, index: usize) -> &Arc<ShardNode> {
        &self.shards[index]
    }

    pub fn storage_root(&self) -> PathBuf {
        self._tmp.path().join("data")
    }

    pub fn scratch_dir(&self) -> &Path {
        self._tmp.path()
    }

    /// Upload a photo and wait until the shard's reply has landed in the
    /// metadata store (duplicates return immediately).
    pub async fn upload(&self, name: &str, payload: &[u8]) -> UploadOutcome {
        let outcome = self
            .leader
            .upload(name, "jpeg", payload.to_vec())
            .await
            .expect("upload failed");
        if let UploadOutcome::Routed { photo_id, .. } = &outcome {
            let id = photo_id.clone();
            let recorded = async {
                while !self.store.exists(&id) {
                    tokio::time::sleep(POLL).await;
                }
            };
            timeout(WAIT, recorded)
                .await
                .expect("upload reply never recorded");
        }
        outcome
    }

    pub async fn search(&self, prompt: &str, mode: SearchMode) {
        self.leader.search(prompt, mode).await.expect("search failed");
    }

    /// Next finalized search off the results channel.
    pub async fn next_result(&mut self) -> FinalizedSearch {
        timeout(WAIT, self.results.recv())
            .await
            .expect("timed out waiting for a search result")
            .expect("results channel closed")
    }

    /// Assert no result arrives within `window`.
    pub async fn expect_no_result(&mut self, window: Duration) {
        if let Ok(result) = timeout(window, self.results.recv()).await {
            panic!("unexpected result: {:?}", result.map(|r| r.request_id));
        }
    }

    /// Simulate a shard vanishing (or coming back) by dropping everything
    /// it sends, heartbeats included.
    pub fn partition_shard(&self, index: usize, dropped: bool) {
        self.mesh[&self.addrs[2 + 2 * index]].set_drop_outbound(dropped);
        self.mesh[&self.addrs[3 + 2 * index]].set_drop_outbound(dropped);
    }

    pub fn alive_count(&self) -> usize {
        self.leader
            .ls()
            .iter()
            .filter(|m| m.status == MemberStatus::Alive)
            .count()
    }

    /// Wait until a shard's local index holds no vectors, after a clear.
    pub async fn wait_cleared(&self, index: usize) {
        let shard = Arc::clone(&self.shards[index]);
        let settle = async {
            while shard.indexed_count() != 0 {
                tokio::time::sleep(POLL).await;
            }
        };
        timeout(WAIT, settle)
            .await
            .unwrap_or_else(|_| panic!("shard {index} never cleared its index"));
    }

    /// Wait until exactly `n` members are alive.
    pub async fn wait_alive(&self, n: usize) {
        let settle = async {
            while self.alive_count() != n {
                tokio::time::sleep(POLL).await;
            }
        };
        timeout(WAIT, settle)
            .await
            .unwrap_or_else(|_| panic!("never reached {n} alive members"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumo_placement::photo_id_for_bytes;

    #[tokio::test]
    async fn test_cluster_assigns_sequential_shard_ids() {
        let cluster = TestCluster::start(3).await;
        let ids: Vec<_> = cluster.leader.ls().iter().map(|m| m.shard_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(cluster.alive_count(), 3);
    }

    #[tokio::test]
    async fn test_upload_round_trip_records_metadata() {
        let cluster = TestCluster::start(2).await;
        let outcome = cluster.upload("a.jpg", b"pixels").await;
        match outcome {
            UploadOutcome::Routed { photo_id, .. } => {
                assert_eq!(photo_id, photo_id_for_bytes(b"pixels"));
                assert!(cluster.store.exists(&photo_id));
            }
            other => panic!("expected routed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_cleared_observes_index_wipe() {
        let cluster = TestCluster::start(1).await;
        cluster.upload("a.jpg", b"pixels").await;
        assert_eq!(cluster.shard(0).indexed_count(), 1);

        cluster.leader.clear().await;
        cluster.wait_cleared(0).await;
        assert_eq!(cluster.shard(0).indexed_count(), 0);
    }

    #[tokio::test]
    async fn test_partition_marks_member_dead() {
        let cluster = TestCluster::start(2).await;
        cluster.partition_shard(0, true);
        cluster.wait_alive(1).await;
        cluster.partition_shard(0, false);
        // The shard keeps heartbeating; heartbeats alone never revive it.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(cluster.alive_count(), 1);
    }
}
