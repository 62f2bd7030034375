//! Durable `vector_id → photo` mapping table.
//!
//! The table and the vector index must stay in step: every index add is
//! followed by a table insert, and `clear` wipes both together. Each
//! mutation persists the whole table; shard tables hold at most tens of
//! thousands of entries, so a full rewrite is cheap and keeps recovery
//! trivial.

use crate::ShardError;
use lumo_core::VectorEntry;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct PhotoTable {
    entries: RwLock<HashMap<u64, VectorEntry>>,
    path: PathBuf,
}

impl PhotoTable {
    /// Load the table from `path`, or start empty when the file is absent.
    pub fn load_or_create(path: &Path) -> Result<Self, ShardError> {
        let entries = if path.exists() {
            let bytes = std::fs::read(path)?;
            let list: Vec<VectorEntry> = bincode::deserialize(&bytes)
                .map_err(|e| ShardError::Persistence(e.to_string()))?;
            list.into_iter().map(|e| (e.vector_id, e)).collect()
        } else {
            HashMap::new()
        };
        Ok(Self {
            entries: RwLock::new(entries),
            path: path.to_path_buf(),
        })
    }

    /// Insert an entry and persist.
    pub fn insert(&self, entry: VectorEntry) -> Result<(), ShardError> {
        let mut entries = self.entries.write();
        entries.insert(entry.vector_id, entry);
        self.persist(&entries)
    }

    pub fn get(&self, vector_id: u64) -> Option<VectorEntry> {
        self.entries.read().get(&vector_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every entry and persist the empty table.
    pub fn clear(&self) -> Result<(), ShardError> {
        let mut entries = self.entries.write();
        entries.clear();
        self.persist(&entries)
    }

    fn persist(&self, entries: &HashMap<u64, VectorEntry>) -> Result<(), ShardError> {
        let list: Vec<&VectorEntry> = entries.values().collect();
        let bytes =
            bincode::serialize(&list).map_err(|e| ShardError::Persistence(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, bytes)?;
        Ok(())
    }
}
