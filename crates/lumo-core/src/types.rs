//! Core data types shared across the cluster.

use serde::{Deserialize, Serialize};

/// Stable shard index assigned by the leader at registration.
pub type ShardId = u32;

/// Inclusive time range in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Range length in (fractional) days.
    pub fn length_days(&self) -> f64 {
        (self.end - self.start) as f64 / 86_400.0
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.start <= ts && ts <= self.end
    }
}

/// Geographic bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeoBox {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        self.min_lat <= lat && lat <= self.max_lat && self.min_lon <= lon && lon <= self.max_lon
    }

    /// Widen the box by the given degree deltas on each side.
    pub fn expanded(&self, delta_lat: f64, delta_lon: f64) -> Self {
        Self {
            min_lat: self.min_lat - delta_lat,
            max_lat: self.max_lat + delta_lat,
            min_lon: self.min_lon - delta_lon,
            max_lon: self.max_lon + delta_lon,
        }
    }
}

/// Global metadata record for one photo, keyed by its content hash.
///
/// Created exactly once, on the first successful ingestion ack; re-uploads
/// of identical bytes are detected before send and never reach here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Content-addressed identity (hex SHA-256 of the raw bytes).
    pub photo_id: String,
    /// Shard holding the photo bytes and its vector.
    pub shard_id: ShardId,
    pub name: String,
    /// Capture time, unix seconds.
    pub timestamp: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
    pub tags: Vec<String>,
}

impl PhotoRecord {
    pub fn new(photo_id: impl Into<String>, shard_id: ShardId, name: impl Into<String>) -> Self {
        Self {
            photo_id: photo_id.into(),
            shard_id,
            name: name.into(),
            timestamp: None,
            lat: None,
            lon: None,
            camera_make: None,
            camera_model: None,
            tags: Vec::new(),
        }
    }
}

/// Per-shard mapping from a vector id to the photo it embeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Sequential id within this shard's index lifetime.
    pub vector_id: u64,
    pub photo_id: String,
    pub name: String,
    pub format: String,
    /// Where the shard saved the original bytes locally.
    pub local_path: std::path::PathBuf,
}
