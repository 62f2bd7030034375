use lumo_cluster::{
    CoordinatorConfig, Deadline, GatherPolicy, LeaderConfig, LeaderNode, QueryCoordinator,
    WaitForAll,
};
use lumo_core::{EmbeddingConfig, MemoryMetaStore, NoopPhotoMetaExtractor, NoopPromptExtractor};
use lumo_proto::tcp::TcpTransport;
use lumo_proto::udp::UdpTransport;
use lumo_server::config::{Role, ServerConfig};
use lumo_server::encoder::HashingEncoder;
use lumo_server::shell::Shell;
use lumo_shard::{ShardNode, ShardNodeConfig};
use lumo_vector::DistanceMetric;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "lumo.yaml".to_string());

    let config = if std::path::Path::new(&config_path).exists() {
        tracing::info!("loading configuration from {}", config_path);
        ServerConfig::load_from_file(&config_path)?
    } else {
        tracing::warn!("config file not found, loading from environment variables");
        ServerConfig::load_from_env()?
    };

    tracing::info!(
        role = ?config.role,
        control = %config.control_addr,
        heartbeat = %config.heartbeat_addr,
        data_dir = %config.data_dir.display(),
        "starting lumo node"
    );

    match config.role {
        Role::Leader => run_leader(config).await,
        Role::Shard => run_shard(config).await,
    }
}

async fn run_leader(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let control = Arc::new(TcpTransport::bind(config.control_addr).await?);
    let heartbeats = Arc::new(UdpTransport::bind(config.heartbeat_addr).await?);

    let policy: Box<dyn GatherPolicy> = match config.search.gather_deadline_ms {
        Some(ms) => Box::new(Deadline(Duration::from_millis(ms))),
        None => Box::new(WaitForAll),
    };
    let coordinator = Arc::new(QueryCoordinator::new(
        CoordinatorConfig {
            default_k: config.search.default_k,
            trim_fraction: config.search.trim_fraction,
            metric: DistanceMetric::SquaredEuclidean,
            presentation_threshold: config.search.presentation_threshold,
        },
        policy,
    ));

    let (results_tx, results_rx) = mpsc::channel(64);
    let node = Arc::new(LeaderNode::new(
        LeaderConfig {
            heartbeat_timeout: config.heartbeat_timeout(),
            sweep_interval: config.sweep_interval(),
            embedding: EmbeddingConfig {
                model: format!("feature-hash/{}", config.embedding_dimension),
                device: "cpu".to_string(),
                normalize: true,
            },
            storage_root: config.data_dir.clone(),
        },
        Arc::new(MemoryMetaStore::new()),
        coordinator,
        control,
        heartbeats,
        Arc::new(HashingEncoder::new(config.embedding_dimension)),
        Arc::new(NoopPromptExtractor),
        results_tx,
    ));
    node.spawn();
    tracing::info!("leader ready");

    Shell::new(node, results_rx).run().await?;
    tracing::info!("shell exited, shutting down");
    Ok(())
}

async fn run_shard(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let control = Arc::new(TcpTransport::bind(config.control_addr).await?);
    let heartbeats = Arc::new(UdpTransport::bind(config.heartbeat_addr).await?);

    let node = Arc::new(ShardNode::new(
        ShardNodeConfig {
            leader_addr: config.leader.control_addr,
            leader_heartbeat_addr: config.leader.heartbeat_addr,
            heartbeat_interval: config.heartbeat_interval(),
            metric: DistanceMetric::SquaredEuclidean,
        },
        control,
        heartbeats,
        Arc::new(HashingEncoder::new(config.embedding_dimension)),
        Arc::new(NoopPhotoMetaExtractor),
    ));

    tokio::select! {
        result = node.clone().run() => {
            result?;
            tracing::info!("shard loop exited");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
    }
    Ok(())
}
