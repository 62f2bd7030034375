//! Node configuration.
//!
//! Loads and validates configuration from a YAML file or environment
//! variables. One config schema covers both roles; shard-only fields are
//! ignored by a leader and vice versa.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Which half of the cluster this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Leader,
    Shard,
}

/// Node configuration.
///
/// Example YAML:
/// ```yaml
/// role: leader
/// control_addr: "0.0.0.0:7801"
/// heartbeat_addr: "0.0.0.0:7802"
/// data_dir: "/var/lib/lumo"
/// search:
///   default_k: 500
///   gather_deadline_ms: 5000
/// liveness:
///   heartbeat_timeout_ms: 10000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub role: Role,

    /// Reliable control listener (TCP).
    #[serde(default = "default_control_addr")]
    pub control_addr: SocketAddr,

    /// Best-effort heartbeat listener (UDP).
    #[serde(default = "default_heartbeat_addr")]
    pub heartbeat_addr: SocketAddr,

    /// Root directory for shard indices, mapping tables, and photo bytes.
    pub data_dir: PathBuf,

    /// Where a shard finds its leader. Unused by the leader role.
    #[serde(default)]
    pub leader: LeaderPeerConfig,

    /// Embedding vector dimension; every node in a cluster must agree.
    #[serde(default = "default_dimension")]
    pub embedding_dimension: usize,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub liveness: LivenessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderPeerConfig {
    #[serde(default = "default_control_addr")]
    pub control_addr: SocketAddr,

    #[serde(default = "default_heartbeat_addr")]
    pub heartbeat_addr: SocketAddr,
}

impl Default for LeaderPeerConfig {
    fn default() -> Self {
        Self {
            control_addr: default_control_addr(),
            heartbeat_addr: default_heartbeat_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Baseline per-shard result count.
    #[serde(default = "default_k")]
    pub default_k: u32,

    /// Fraction of worst raw hits dropped before fusion.
    #[serde(default = "default_trim_fraction")]
    pub trim_fraction: f64,

    /// Minimum final score shown to the user.
    #[serde(default = "default_presentation_threshold")]
    pub presentation_threshold: f64,

    /// Force-finalize incomplete gathers after this long. Absent means
    /// wait for every shard.
    #[serde(default)]
    pub gather_deadline_ms: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            trim_fraction: default_trim_fraction(),
            presentation_threshold: default_presentation_threshold(),
            gather_deadline_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Shard-side beacon period.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// A member silent for longer than this is marked dead.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Leader sweep period.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

fn default_control_addr() -> SocketAddr {
    "127.0.0.1:7801".parse().unwrap()
}

fn default_heartbeat_addr() -> SocketAddr {
    "127.0.0.1:7802".parse().unwrap()
}

fn default_dimension() -> usize {
    512
}

fn default_k() -> u32 {
    500
}

fn default_trim_fraction() -> f64 {
    0.1
}

fn default_presentation_threshold() -> f64 {
    0.5
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_sweep_interval_ms() -> u64 {
    2000
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("failed to read config file: {}", e)))?;
        let config: ServerConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Supported variables:
    /// - LUMO_ROLE ("leader" or "shard")
    /// - LUMO_CONTROL_ADDR
    /// - LUMO_HEARTBEAT_ADDR
    /// - LUMO_DATA_DIR
    /// - LUMO_LEADER_ADDR
    /// - LUMO_LEADER_HEARTBEAT_ADDR
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let role = match std::env::var("LUMO_ROLE")
            .map_err(|_| ConfigError::MissingField("LUMO_ROLE".to_string()))?
            .as_str()
        {
            "leader" => Role::Leader,
            "shard" => Role::Shard,
            other => {
                return Err(ConfigError::InvalidField(format!(
                    "LUMO_ROLE must be leader or shard, got {}",
                    other
                )))
            }
        };
        let data_dir = std::env::var("LUMO_DATA_DIR")
            .map_err(|_| ConfigError::MissingField("LUMO_DATA_DIR".to_string()))?;

        let config = ServerConfig {
            role,
            control_addr: env_addr("LUMO_CONTROL_ADDR", default_control_addr())?,
            heartbeat_addr: env_addr("LUMO_HEARTBEAT_ADDR", default_heartbeat_addr())?,
            data_dir: PathBuf::from(data_dir),
            leader: LeaderPeerConfig {
                control_addr: env_addr("LUMO_LEADER_ADDR", default_control_addr())?,
                heartbeat_addr: env_addr("LUMO_LEADER_HEARTBEAT_ADDR", default_heartbeat_addr())?,
            },
            embedding_dimension: default_dimension(),
            search: SearchConfig::default(),
            liveness: LivenessConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .map_err(|e| ConfigError::InvalidField(format!("cannot create data_dir: {}", e)))?;
        }
        if !self.data_dir.is_dir() {
            return Err(ConfigError::InvalidField(
                "data_dir exists but is not a directory".to_string(),
            ));
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidField(
                "embedding_dimension must be > 0".to_string(),
            ));
        }
        if self.search.default_k == 0 {
            return Err(ConfigError::InvalidField(
                "search.default_k must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.search.trim_fraction) {
            return Err(ConfigError::InvalidField(
                "search.trim_fraction must be in [0, 1)".to_string(),
            ));
        }
        if self.liveness.heartbeat_interval_ms == 0
            || self.liveness.heartbeat_timeout_ms == 0
            || self.liveness.sweep_interval_ms == 0
        {
            return Err(ConfigError::InvalidField(
                "liveness periods must be > 0".to_string(),
            ));
        }
        if self.liveness.heartbeat_timeout_ms <= self.liveness.heartbeat_interval_ms {
            return Err(ConfigError::InvalidField(
                "heartbeat_timeout_ms must exceed heartbeat_interval_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.liveness.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness.heartbeat_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.liveness.sweep_interval_ms)
    }
}

fn env_addr(var: &str, fallback: SocketAddr) -> Result<SocketAddr, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| ConfigError::InvalidField(format!("invalid {}: {}", var, e))),
        Err(_) => Ok(fallback),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid field: {0}")]
    InvalidField(String),
}
