//! Global photo metadata store interface and in-memory implementation.
//!
//! The leader keys records by `photo_id`; the per-shard row counts drive
//! the query coordinator's candidate-shard selection. Filter semantics
//! deliberately treat a missing field as matching: a photo without GPS data
//! is not excluded by a location constraint, it just scores 0 on it later.

use crate::types::{GeoBox, PhotoRecord, ShardId, TimeRange};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Metadata store errors.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("duplicate photo_id: {0}")]
    Duplicate(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Metadata prefilter derived from a prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaFilter {
    pub time_range: Option<TimeRange>,
    /// A record matches if its position is inside any of these boxes.
    pub bboxes: Vec<GeoBox>,
}

impl MetaFilter {
    /// Whether a record passes the filter. Missing fields pass.
    pub fn matches(&self, record: &PhotoRecord) -> bool {
        if let Some(range) = &self.time_range {
            if let Some(ts) = record.timestamp {
                if !range.contains(ts) {
                    return false;
                }
            }
        }
        if !self.bboxes.is_empty() {
            if let (Some(lat), Some(lon)) = (record.lat, record.lon) {
                if !self.bboxes.iter().any(|b| b.contains(lat, lon)) {
                    return false;
                }
            }
        }
        true
    }

    pub fn is_unconstrained(&self) -> bool {
        self.time_range.is_none() && self.bboxes.is_empty()
    }
}

/// Fraction of records carrying each metadata field class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetaAvailability {
    /// Fraction with lat and lon.
    pub location: f64,
    /// Fraction with a timestamp.
    pub time: f64,
}

/// Global metadata store seam.
///
/// Implementations must be safe to call from multiple tasks; the in-memory
/// implementation below uses an RwLock, a relational backend would rely on
/// its own connection discipline.
pub trait MetadataStore: Send + Sync {
    /// Insert a record. Duplicate `photo_id`s are an error; callers dedupe
    /// with [`MetadataStore::exists`] before routing an upload.
    fn insert(&self, record: PhotoRecord) -> Result<(), MetaError>;

    /// Whether a record with this content hash exists.
    fn exists(&self, photo_id: &str) -> bool;

    /// Per-shard count of records matching the filter, sorted descending by
    /// count. Shards with zero matches are omitted.
    fn count_by_shard(&self, filter: &MetaFilter) -> Vec<(ShardId, u64)>;

    /// Records matching the filter on the given shards.
    fn fetch(&self, filter: &MetaFilter, shard_ids: &[ShardId]) -> Vec<PhotoRecord>;

    /// All records matching the filter regardless of shard.
    fn fetch_all(&self, filter: &MetaFilter) -> Vec<PhotoRecord>;

    /// Field-availability fractions over the whole store.
    fn availability(&self) -> MetaAvailability;

    /// Total record count.
    fn len(&self) -> usize;

    /// Whether the store is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every record.
    fn delete_all(&self);
}

/// In-memory metadata store keyed by `photo_id`.
#[derive(Default)]
pub struct MemoryMetaStore {
    records: RwLock<HashMap<String, PhotoRecord>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetaStore {
    fn insert(&self, record: PhotoRecord) -> Result<(), MetaError> {
        let mut records = self.records.write();
        if records.contains_key(&record.photo_id) {
            return Err(MetaError::Duplicate(record.photo_id));
        }
        records.insert(record.photo_id.clone(), record);
        Ok(())
    }

    fn exists(&self, photo_id: &str) -> bool {
        self.records.read().contains_key(photo_id)
    }

    fn count_by_shard(&self, filter: &MetaFilter) -> Vec<(ShardId, u64)> {
        let records = self.records.read();
        let mut counts: HashMap<ShardId, u64> = HashMap::new();
        for record in records.values() {
            if filter.matches(record) {
                *counts.entry(record.shard_id).or_insert(0) += 1;
            }
        }
        let mut counts: Vec<(ShardId, u64)> = counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        counts
    }

    fn fetch(&self, filter: &MetaFilter, shard_ids: &[ShardId]) -> Vec<PhotoRecord> {
        self.records
            .read()
            .values()
            .filter(|r| shard_ids.contains(&r.shard_id) && filter.matches(r))
            .cloned()
            .collect()
    }

    fn fetch_all(&self, filter: &MetaFilter) -> Vec<PhotoRecord> {
        self.records
            .read()
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    fn availability(&self) -> MetaAvailability {
        let records = self.records.read();
        let total = records.len();
        if total == 0 {
            return MetaAvailability {
                location: 0.0,
                time: 0.0,
            };
        }
        let with_loc = records
            .values()
            .filter(|r| r.lat.is_some() && r.lon.is_some())
            .count();
        let with_ts = records.values().filter(|r| r.timestamp.is_some()).count();
        MetaAvailability {
            location: with_loc as f64 / total as f64,
            time: with_ts as f64 / total as f64,
        }
    }

    fn len(&self) -> usize {
        self.records.read().len()
    }

    fn delete_all(&self) {
        self.records.write().clear();
    }
}
