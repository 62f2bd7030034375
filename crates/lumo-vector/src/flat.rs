//! Flat (linear scan) vector index with durable snapshots.
//!
//! Insertion is O(1), search is O(n·d). That is the right trade for a shard
//! that holds at most a few tens of thousands of photos and must hand out
//! stable sequential vector ids.

use crate::distance::DistanceMetric;
use crate::{Result, VectorError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sentinel id returned in unfilled search slots. Callers must filter it.
pub const NO_RESULT: i64 = -1;

/// One slot of a search result. `vector_id` is [`NO_RESULT`] when the index
/// held fewer vectors than the requested `k`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSlot {
    pub vector_id: i64,
    pub score: f32,
}

/// Serialized form of the index for save/load.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    metric: DistanceMetric,
    vectors: Vec<Vec<f32>>,
}

/// Flat vector index.
///
/// Vector ids are assigned sequentially from 0 in insertion order; the id of
/// a vector is its position in the store. Ids are never reused except after
/// [`FlatIndex::clear`], which resets the counter to 0.
///
/// Thread-safe via an internal RwLock; a shard serializes ingestion and
/// query anyway, but concurrent readers are harmless.
pub struct FlatIndex {
    vectors: RwLock<Vec<Vec<f32>>>,
    dimension: usize,
    metric: DistanceMetric,
}

impl FlatIndex {
    /// Create a new empty index.
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            vectors: RwLock::new(Vec::new()),
            dimension,
            metric,
        }
    }

    /// The configured vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The configured distance metric.
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Number of stored vectors. Also the id the next `add` will return.
    pub fn len(&self) -> usize {
        self.vectors.read().len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.vectors.read().is_empty()
    }

    fn validate(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        for (i, &v) in vector.iter().enumerate() {
            if !v.is_finite() {
                return Err(VectorError::InvalidVector(format!(
                    "non-finite value at index {}",
                    i
                )));
            }
        }
        Ok(())
    }

    /// Append a vector and return its assigned id.
    ///
    /// Ids are exactly `0..N` in call order on a fresh or cleared index.
    pub fn add(&self, vector: &[f32]) -> Result<u64> {
        self.validate(vector)?;
        let mut vectors = self.vectors.write();
        let id = vectors.len() as u64;
        vectors.push(vector.to_vec());
        Ok(id)
    }

    /// Search for the k best matches under the configured metric.
    ///
    /// Always returns exactly `k` slots ordered best-first; slots beyond the
    /// number of stored vectors carry [`NO_RESULT`] and the metric's worst
    /// score, which the caller must filter out.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchSlot>> {
        self.validate(query)?;
        if k == 0 {
            return Ok(vec![]);
        }

        let vectors = self.vectors.read();
        let mut hits: Vec<SearchSlot> = vectors
            .iter()
            .enumerate()
            .map(|(id, v)| SearchSlot {
                vector_id: id as i64,
                score: self.metric.score(query, v),
            })
            .collect();

        let metric = self.metric;
        hits.sort_by(|a, b| {
            if metric.is_better(a.score, b.score) {
                std::cmp::Ordering::Less
            } else if metric.is_better(b.score, a.score) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        hits.truncate(k);

        while hits.len() < k {
            hits.push(SearchSlot {
                vector_id: NO_RESULT,
                score: metric.worst(),
            });
        }
        Ok(hits)
    }

    /// Replace the contents with an empty index of the same metric and
    /// dimension, resetting the id counter to 0.
    pub fn clear(&self) {
        self.vectors.write().clear();
    }

    /// Persist the index contents to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            dimension: self.dimension,
            metric: self.metric,
            vectors: self.vectors.read().clone(),
        };
        let bytes = bincode::serialize(&snapshot)
            .map_err(|e| VectorError::Persistence(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VectorError::Persistence(e.to_string()))?;
        }
        std::fs::write(path, bytes).map_err(|e| VectorError::Persistence(e.to_string()))
    }

    /// Load a persisted index from `path`.
    ///
    /// Rejects a snapshot whose dimension disagrees with `dimension` — this
    /// is a hard error, never a silent truncation or padding.
    pub fn load(path: &Path, dimension: usize, metric: DistanceMetric) -> Result<Self> {
        let bytes =
            std::fs::read(path).map_err(|e| VectorError::Persistence(e.to_string()))?;
        let snapshot: Snapshot = bincode::deserialize(&bytes)
            .map_err(|e| VectorError::Persistence(e.to_string()))?;
        if snapshot.dimension != dimension {
            return Err(VectorError::DimensionMismatch {
                expected: dimension,
                actual: snapshot.dimension,
            });
        }
        Ok(Self {
            vectors: RwLock::new(snapshot.vectors),
            dimension,
            metric,
        })
    }

    /// Load from `path` if it exists, otherwise create an empty index.
    pub fn load_or_create(
        path: &Path,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<Self> {
        if path.exists() {
            Self::load(path, dimension, metric)
        } else {
            Ok(Self::new(dimension, metric))
        }
    }
}
