//! Initialized shard state: index, mapping table, and photo directory.
//!
//! Built from the leader's registration ack. A dimension mismatch between
//! a persisted index and the configured embedding dimension is a hard
//! startup error; the index is never silently truncated or padded.

use crate::table::PhotoTable;
use crate::ShardError;
use lumo_core::exif::PhotoMetaExtractor;
use lumo_core::{Embedder, PhotoRecord, ShardId, VectorEntry};
use lumo_proto::ShardHit;
use lumo_vector::{DistanceMetric, FlatIndex, NO_RESULT};
use std::net::SocketAddr;
use std::path::PathBuf;

pub struct ShardState {
    pub shard_id: ShardId,
    pub leader_addr: SocketAddr,
    index: FlatIndex,
    index_path: PathBuf,
    table: PhotoTable,
    photos_dir: PathBuf,
}

impl ShardState {
    /// Initialize shard-local storage under `storage_root/shard{id}`.
    ///
    /// Reloads any persisted index and table; fails when the persisted
    /// index dimension disagrees with the embedding dimension.
    pub fn init(
        shard_id: ShardId,
        leader_addr: SocketAddr,
        storage_root: &std::path::Path,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<Self, ShardError> {
        let base_dir = storage_root.join(format!("shard{shard_id}"));
        let photos_dir = base_dir.join("photos");
        std::fs::create_dir_all(&photos_dir)?;
        let index_path = base_dir.join("flat.index");
        let table_path = base_dir.join("photos.table");

        let index = FlatIndex::load_or_create(&index_path, dimension, metric)?;
        index.save(&index_path)?;
        let table = PhotoTable::load_or_create(&table_path)?;
        tracing::info!(
            shard_id,
            vectors = index.len(),
            photos = table.len(),
            base_dir = %base_dir.display(),
            "shard state initialized"
        );
        Ok(Self {
            shard_id,
            leader_addr,
            index,
            index_path,
            table,
            photos_dir,
        })
    }

    /// Stored vector count.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Ingest one photo: save the bytes, embed, index, map, and merge the
    /// EXIF metadata into the record sent back to the leader.
    pub fn ingest(
        &self,
        embedder: &dyn Embedder,
        extractor: &dyn PhotoMetaExtractor,
        photo_id: &str,
        name: &str,
        format: &str,
        payload: &[u8],
    ) -> Result<PhotoRecord, ShardError> {
        let local_path = self
            .photos_dir
            .join(format!("{photo_id}.{}", format.to_lowercase()));
        std::fs::write(&local_path, payload)?;

        let vector = embedder.encode_image(payload)?;
        let vector_id = self.index.add(&vector)?;
        self.index.save(&self.index_path)?;
        self.table.insert(VectorEntry {
            vector_id,
            photo_id: photo_id.to_string(),
            name: name.to_string(),
            format: format.to_string(),
            local_path: local_path.clone(),
        })?;
        tracing::info!(
            shard_id = self.shard_id,
            photo_id,
            vector_id,
            "indexed photo"
        );

        let meta = extractor.extract(payload, format);
        let mut record = PhotoRecord::new(photo_id, self.shard_id, name);
        record.timestamp = meta.timestamp;
        record.lat = meta.lat;
        record.lon = meta.lon;
        record.camera_make = meta.camera_make;
        record.camera_model = meta.camera_model;
        Ok(record)
    }

    /// Run a local nearest-neighbor query and resolve hits through the
    /// mapping table. Sentinel slots are dropped here; an id without a
    /// table entry is logged and skipped. With `with_payload` the photo
    /// bytes are inlined for the leader to save.
    pub fn query(
        &self,
        query: &[f32],
        k: usize,
        with_payload: bool,
    ) -> Result<Vec<ShardHit>, ShardError> {
        let slots = self.index.search(query, k)?;
        let mut hits = Vec::with_capacity(slots.len());
        for slot in slots {
            if slot.vector_id == NO_RESULT {
                continue;
            }
            let entry = match self.table.get(slot.vector_id as u64) {
                Some(entry) => entry,
                None => {
                    tracing::warn!(
                        shard_id = self.shard_id,
                        vector_id = slot.vector_id,
                        "vector id missing from mapping table"
                    );
                    continue;
                }
            };
            let payload = if with_payload {
                match std::fs::read(&entry.local_path) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        tracing::warn!(
                            shard_id = self.shard_id,
                            path = %entry.local_path.display(),
                            "failed to read photo bytes: {}",
                            e
                        );
                        None
                    }
                }
            } else {
                None
            };
            hits.push(ShardHit {
                vector_id: slot.vector_id,
                score: slot.score,
                photo_id: entry.photo_id,
                name: entry.name,
                format: entry.format,
                payload,
            });
        }
        Ok(hits)
    }

    /// Wipe the index, the mapping table, and the photo files together,
    /// resetting the vector id counter to 0.
    pub fn clear(&self) -> Result<(), ShardError> {
        self.index.clear();
        self.index.save(&self.index_path)?;
        self.table.clear()?;
        for dirent in std::fs::read_dir(&self.photos_dir)? {
            let path = dirent?.path();
            if path.is_file() {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), "failed to remove photo: {}", e);
                }
            }
        }
        tracing::info!(shard_id = self.shard_id, "cleared shard state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumo_core::embed::EmbedError;
    use lumo_core::exif::{NoopPhotoMetaExtractor, PhotoMeta};

    const DIM: usize = 4;

    /// Deterministic embedder: vector derived from the byte sum.
    struct ByteSumEmbedder;

    impl Embedder for ByteSumEmbedder {
        fn encode_image(&self, bytes: &[u8]) -> Result<Vec<f32>, EmbedError> {
            let sum: u32 = bytes.iter().map(|b| *b as u32).sum();
            Ok((0..DIM).map(|i| (sum + i as u32) as f32).collect())
        }
        fn encode_text(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            self.encode_image(text.as_bytes())
        }
        fn dimension(&self) -> usize {
            DIM
        }
    }

    struct FixedExif(PhotoMeta);

    impl PhotoMetaExtractor for FixedExif {
        fn extract(&self, _bytes: &[u8], _format: &str) -> PhotoMeta {
            self.0.clone()
        }
    }

    fn leader_addr() -> SocketAddr {
        "127.0.0.1:9400".parse().unwrap()
    }

    fn state(root: &std::path::Path) -> ShardState {
        ShardState::init(
            0,
            leader_addr(),
            root,
            DIM,
            DistanceMetric::SquaredEuclidean,
        )
        .unwrap()
    }

    #[test]
    fn test_ingest_assigns_sequential_ids_and_saves_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(dir.path());

        for i in 0..3u8 {
            let record = s
                .ingest(
                    &ByteSumEmbedder,
                    &NoopPhotoMetaExtractor,
                    &format!("photo{i}"),
                    &format!("photo{i}.jpg"),
                    "JPEG",
                    &[i, i, i],
                )
                .unwrap();
            assert_eq!(record.shard_id, 0);
        }
        assert_eq!(s.len(), 3);
        assert!(dir
            .path()
            .join("shard0/photos/photo1.jpeg")
            .exists());
    }

    #[test]
    fn test_ingest_merges_exif_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(dir.path());
        let exif = FixedExif(PhotoMeta {
            timestamp: Some(1_700_000_000),
            lat: Some(35.0),
            lon: Some(139.0),
            camera_make: Some("Fuji".into()),
            camera_model: None,
        });

        let record = s
            .ingest(&ByteSumEmbedder, &exif, "p", "p.jpg", "jpeg", &[1, 2, 3])
            .unwrap();
        assert_eq!(record.timestamp, Some(1_700_000_000));
        assert_eq!(record.lat, Some(35.0));
        assert_eq!(record.camera_make.as_deref(), Some("Fuji"));
    }

    #[test]
    fn test_query_resolves_hits_and_inlines_payload() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(dir.path());
        s.ingest(
            &ByteSumEmbedder,
            &NoopPhotoMetaExtractor,
            "p",
            "p.jpg",
            "jpeg",
            &[5, 5],
        )
        .unwrap();

        let query = ByteSumEmbedder.encode_image(&[5, 5]).unwrap();
        // k larger than the store: sentinels are dropped, not returned.
        let hits = s.query(&query, 4, false).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].photo_id, "p");
        assert!(hits[0].payload.is_none());

        let hits = s.query(&query, 1, true).unwrap();
        assert_eq!(hits[0].payload.as_deref(), Some(&[5u8, 5][..]));
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = state(dir.path());
            s.ingest(
                &ByteSumEmbedder,
                &NoopPhotoMetaExtractor,
                "p",
                "p.jpg",
                "jpeg",
                &[9],
            )
            .unwrap();
        }
        let s = state(dir.path());
        assert_eq!(s.len(), 1);
        let query = ByteSumEmbedder.encode_image(&[9]).unwrap();
        let hits = s.query(&query, 1, false).unwrap();
        assert_eq!(hits[0].photo_id, "p");
    }

    #[test]
    fn test_init_rejects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = state(dir.path());
            s.ingest(
                &ByteSumEmbedder,
                &NoopPhotoMetaExtractor,
                "p",
                "p.jpg",
                "jpeg",
                &[9],
            )
            .unwrap();
        }
        let result = ShardState::init(
            0,
            leader_addr(),
            dir.path(),
            DIM + 1,
            DistanceMetric::SquaredEuclidean,
        );
        assert!(matches!(
            result,
            Err(ShardError::Vector(
                lumo_vector::VectorError::DimensionMismatch { .. }
            ))
        ));
    }

    #[test]
    fn test_clear_wipes_everything_and_resets_ids() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(dir.path());
        s.ingest(
            &ByteSumEmbedder,
            &NoopPhotoMetaExtractor,
            "p",
            "p.jpg",
            "jpeg",
            &[7],
        )
        .unwrap();
        let photo_path = dir.path().join("shard0/photos/p.jpeg");
        assert!(photo_path.exists());

        s.clear().unwrap();
        assert!(s.is_empty());
        assert!(!photo_path.exists());

        // Id counter restarts at 0.
        let record = s
            .ingest(
                &ByteSumEmbedder,
                &NoopPhotoMetaExtractor,
                "q",
                "q.jpg",
                "jpeg",
                &[8],
            )
            .unwrap();
        assert_eq!(record.photo_id, "q");
        let query = ByteSumEmbedder.encode_image(&[8]).unwrap();
        assert_eq!(s.query(&query, 1, false).unwrap()[0].vector_id, 0);
    }
}
