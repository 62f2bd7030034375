//! Turns prompt metadata and merged vector hits into one ranked list.
//!
//! Metadata similarities are computed against the global metadata store,
//! widened past the queried region so near-misses still score. Vector
//! similarities are computed over the merged, best-first shard results.
//! The two maps are blended with availability/confidence-adaptive weights
//! and cut at a presentation threshold.

use crate::formulas::{
    bbox_radius_km, blended_weights, constant_tau, distance_to_bbox_km, location_similarity,
    max_query_distance, max_query_time_days, target_ranking, time_similarity, vector_confidence,
    vector_similarity,
};
use lumo_core::meta::{MetaFilter, MetadataStore};
use lumo_core::prompt::PromptMeta;
use lumo_core::types::TimeRange;
use std::collections::{HashMap, HashSet};

/// Rank anchoring the confidence comparison, `s_r` in the confidence
/// formula.
const CONFIDENCE_RANK: usize = 100;

/// One photo in the final ranked output.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedPhoto {
    pub photo_id: String,
    pub score: f64,
}

/// Ranked photos plus the blend weights that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutput {
    pub ranked: Vec<RankedPhoto>,
    pub w_m: f64,
    pub w_v: f64,
}

/// Metadata similarity scores with the normalized weight split that
/// produced them.
#[derive(Debug, Clone, Default)]
pub struct MetadataScores {
    pub scores: HashMap<String, f64>,
    /// Normalized location weight, `w_loc / (w_loc + w_time)`.
    pub w_loc: f64,
    /// Normalized time weight.
    pub w_time: f64,
}

/// Adaptive fusion scorer.
#[derive(Debug, Clone, Copy)]
pub struct FusionScorer {
    /// Photos scoring below this are not presented.
    pub presentation_threshold: f64,
}

impl Default for FusionScorer {
    fn default() -> Self {
        Self {
            presentation_threshold: 0.5,
        }
    }
}

impl FusionScorer {
    pub fn new(presentation_threshold: f64) -> Self {
        Self {
            presentation_threshold,
        }
    }

    /// Per-photo metadata similarity from location mentions and the time
    /// range, each widened to its minimum-similarity window before the
    /// store fetch. Returns empty scores when the prompt carries no
    /// location or time signal.
    pub fn metadata_scores(&self, meta: &PromptMeta, store: &dyn MetadataStore) -> MetadataScores {
        let w_loc = meta.location_weight();
        let w_time = if meta.time_range.is_some() {
            meta.time_weight
        } else {
            0.0
        };
        let mass = w_loc + w_time;
        if mass <= 0.0 {
            return MetadataScores::default();
        }
        let w_loc_nml = w_loc / mass;
        let w_time_nml = w_time / mass;

        let mut scores: HashMap<String, f64> = HashMap::new();

        for mention in &meta.locations {
            let lambda_km = 0.5 * bbox_radius_km(&mention.bbox);
            let ref_lat = (mention.bbox.min_lat + mention.bbox.max_lat) / 2.0;
            let (delta_lat, delta_lon) = max_query_distance(lambda_km, ref_lat);
            let filter = MetaFilter {
                time_range: None,
                bboxes: vec![mention.bbox.expanded(delta_lat, delta_lon)],
            };
            for record in store.fetch_all(&filter) {
                let (lat, lon) = match (record.lat, record.lon) {
                    (Some(lat), Some(lon)) => (lat, lon),
                    _ => continue,
                };
                let distance_km = distance_to_bbox_km(lat, lon, &mention.bbox);
                let sim_l = location_similarity(distance_km, lambda_km);
                let score = sim_l * (mention.weight / w_loc) * w_loc_nml;
                let entry = scores.entry(record.photo_id).or_insert(0.0);
                // Strongest mention wins per photo.
                if score > *entry {
                    *entry = score;
                }
            }
        }

        if let Some(range) = &meta.time_range {
            if w_time > 0.0 {
                let lambda_days = 0.5 * range.length_days();
                let delta_secs = (max_query_time_days(lambda_days) * 86_400.0) as i64;
                let filter = MetaFilter {
                    time_range: Some(TimeRange::new(
                        range.start - delta_secs,
                        range.end + delta_secs,
                    )),
                    bboxes: vec![],
                };
                for record in store.fetch_all(&filter) {
                    let ts = match record.timestamp {
                        Some(ts) => ts,
                        None => continue,
                    };
                    let sim_t = time_similarity(ts, range, lambda_days);
                    *scores.entry(record.photo_id).or_insert(0.0) += sim_t * w_time_nml;
                }
            }
        }

        MetadataScores {
            scores,
            w_loc: w_loc_nml,
            w_time: w_time_nml,
        }
    }

    /// Vector similarities over merged shard hits, already sorted best
    /// first. The decay constant is anchored at the target ranking derived
    /// from the metadata candidate count `n`.
    pub fn vector_scores(
        &self,
        hits: &[(String, f32)],
        meta_candidates: usize,
    ) -> HashMap<String, f64> {
        let mut scores = HashMap::new();
        if hits.is_empty() {
            return scores;
        }
        let d_1 = hits[0].1 as f64;
        let r = target_ranking(meta_candidates).min(hits.len() - 1);
        let d_r = hits[r].1 as f64;
        let tau = constant_tau(d_1, d_r);
        for (photo_id, distance) in hits {
            // A degenerate flat distribution decays nowhere.
            let sim = if tau == 0.0 || !tau.is_finite() {
                1.0
            } else {
                vector_similarity(tau, d_1, *distance as f64)
            };
            // Hits arrive best first, keep the first score per photo.
            scores.entry(photo_id.clone()).or_insert(sim);
        }
        scores
    }

    /// Blend metadata and vector similarities into the final ranked list.
    ///
    /// `availability` is the weighted fraction of indexed photos carrying
    /// the queried metadata fields. When `candidates` is given, only photos
    /// in that set survive (meta-fusion intersection).
    pub fn fuse(
        &self,
        meta: &MetadataScores,
        vector_scores: &HashMap<String, f64>,
        availability: f64,
        candidates: Option<&HashSet<String>>,
    ) -> FusionOutput {
        let mut sims: Vec<f64> = vector_scores.values().copied().collect();
        sims.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let r_v = if sims.is_empty() {
            0.0
        } else {
            vector_confidence(sims[0], sims[CONFIDENCE_RANK.min(sims.len() - 1)])
        };
        let (w_m, w_v) = blended_weights(availability, r_v);

        let mut final_scores: HashMap<String, f64> = meta
            .scores
            .iter()
            .map(|(id, s)| (id.clone(), s * w_m))
            .collect();
        for (photo_id, sim) in vector_scores {
            *final_scores.entry(photo_id.clone()).or_insert(0.0) += sim * w_v;
        }
        if let Some(candidates) = candidates {
            final_scores.retain(|id, _| candidates.contains(id));
        }

        let mut ranked: Vec<RankedPhoto> = final_scores
            .into_iter()
            .filter(|(_, score)| *score >= self.presentation_threshold)
            .map(|(photo_id, score)| RankedPhoto { photo_id, score })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.photo_id.cmp(&b.photo_id))
        });

        tracing::debug!(
            w_m,
            w_v,
            results = ranked.len(),
            "fused metadata and vector scores"
        );
        FusionOutput { ranked, w_m, w_v }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumo_core::meta::MemoryMetaStore;
    use lumo_core::prompt::LocationMention;
    use lumo_core::types::{GeoBox, PhotoRecord};

    fn scorer() -> FusionScorer {
        FusionScorer::default()
    }

    fn unit_box() -> GeoBox {
        GeoBox {
            min_lat: 0.0,
            max_lat: 1.0,
            min_lon: 0.0,
            max_lon: 1.0,
        }
    }

    fn photo(id: &str, lat: Option<f64>, lon: Option<f64>, ts: Option<i64>) -> PhotoRecord {
        let mut r = PhotoRecord::new(id, 0, format!("{id}.jpg"));
        r.lat = lat;
        r.lon = lon;
        r.timestamp = ts;
        r
    }

    #[test]
    fn test_metadata_scores_empty_prompt() {
        let store = MemoryMetaStore::new();
        let meta = scorer().metadata_scores(&PromptMeta::default(), &store);
        assert!(meta.scores.is_empty());
        assert_eq!(meta.w_loc, 0.0);
        assert_eq!(meta.w_time, 0.0);
    }

    #[test]
    fn test_metadata_scores_location_and_time() {
        let store = MemoryMetaStore::new();
        // Inside the bbox and inside the time range: full marks on both.
        store
            .insert(photo("both", Some(0.5), Some(0.5), Some(43_200)))
            .unwrap();
        // GPS only, inside the bbox.
        store.insert(photo("loc", Some(0.5), Some(0.5), None)).unwrap();
        // No metadata at all: never scored.
        store.insert(photo("bare", None, None, None)).unwrap();

        let prompt = PromptMeta {
            time_range: Some(TimeRange::new(0, 86_400)),
            time_weight: 1.0,
            locations: vec![LocationMention {
                bbox: unit_box(),
                weight: 1.0,
            }],
            tags: vec![],
        };
        let meta = scorer().metadata_scores(&prompt, &store);
        assert!((meta.w_loc - 0.5).abs() < 1e-12);
        assert!((meta.w_time - 0.5).abs() < 1e-12);
        assert!((meta.scores["both"] - 1.0).abs() < 1e-9);
        assert!((meta.scores["loc"] - 0.5).abs() < 1e-9);
        assert!(!meta.scores.contains_key("bare"));
    }

    #[test]
    fn test_metadata_scores_multiple_mentions_take_max() {
        let store = MemoryMetaStore::new();
        store.insert(photo("p", Some(0.5), Some(0.5), None)).unwrap();

        let far_box = GeoBox {
            min_lat: 40.0,
            max_lat: 41.0,
            min_lon: 40.0,
            max_lon: 41.0,
        };
        let prompt = PromptMeta {
            time_range: None,
            time_weight: 0.0,
            locations: vec![
                LocationMention {
                    bbox: unit_box(),
                    weight: 0.5,
                },
                LocationMention {
                    bbox: far_box,
                    weight: 1.0,
                },
            ],
            tags: vec![],
        };
        let meta = scorer().metadata_scores(&prompt, &store);
        // Inside the weaker mention: sim_l 1.0 scaled by 0.5 / w_loc.
        assert!((meta.scores["p"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_vector_scores_half_life_at_target_rank() {
        // 12 hits, ascending distances; small candidate count anchors the
        // decay at rank 10.
        let hits: Vec<(String, f32)> = (0..12)
            .map(|i| (format!("p{i}"), i as f32 * 0.1))
            .collect();
        let scores = scorer().vector_scores(&hits, 4);
        assert!((scores["p0"] - 1.0).abs() < 1e-9);
        assert!((scores["p10"] - 0.5).abs() < 1e-6);
        assert!(scores["p11"] < 0.5);
    }

    #[test]
    fn test_vector_scores_flat_distribution() {
        let hits: Vec<(String, f32)> = (0..5).map(|i| (format!("p{i}"), 1.0)).collect();
        let scores = scorer().vector_scores(&hits, 0);
        assert!(scores.values().all(|s| (*s - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_vector_scores_empty() {
        assert!(scorer().vector_scores(&[], 10).is_empty());
    }

    #[test]
    fn test_fuse_blends_and_thresholds() {
        let meta = MetadataScores {
            scores: HashMap::from([("a".to_string(), 1.0), ("b".to_string(), 0.1)]),
            w_loc: 1.0,
            w_time: 0.0,
        };
        let vector_scores = HashMap::from([("a".to_string(), 1.0), ("c".to_string(), 0.9)]);

        // Full availability, no spread in similarities: pure metadata weight.
        let out = scorer().fuse(&meta, &vector_scores, 1.0, None);
        assert!(out.w_m > 0.9);
        assert_eq!(out.ranked[0].photo_id, "a");
        // "b" scores ~0.1 and is cut by the threshold.
        assert!(out.ranked.iter().all(|r| r.photo_id != "b"));
        // Every presented score clears the threshold.
        assert!(out.ranked.iter().all(|r| r.score >= 0.5));
    }

    #[test]
    fn test_fuse_candidate_intersection() {
        let meta = MetadataScores {
            scores: HashMap::from([("a".to_string(), 1.0)]),
            w_loc: 1.0,
            w_time: 0.0,
        };
        let vector_scores = HashMap::from([("a".to_string(), 1.0), ("x".to_string(), 1.0)]);
        let candidates: HashSet<String> = ["a".to_string()].into();

        let out = scorer().fuse(&meta, &vector_scores, 1.0, Some(&candidates));
        assert_eq!(out.ranked.len(), 1);
        assert_eq!(out.ranked[0].photo_id, "a");
    }

    #[test]
    fn test_fuse_no_metadata_leans_on_vector() {
        let meta = MetadataScores::default();
        // Peaked distribution: top well separated from the tail.
        let mut vector_scores = HashMap::from([("top".to_string(), 1.0)]);
        for i in 0..200 {
            vector_scores.insert(format!("tail{i}"), 0.01);
        }
        let out = scorer().fuse(&meta, &vector_scores, 0.0, None);
        assert!(out.w_v > 0.9);
        assert_eq!(out.ranked[0].photo_id, "top");
    }
}
