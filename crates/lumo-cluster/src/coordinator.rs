//! Scatter-gather query coordination.
//!
//! A search plan decides which shards to contact and with what per-shard
//! `k`; shard replies are aggregated under one lock until the outstanding
//! set drains, at which point the request is removed from the pending map
//! and finalized exactly once. Replies for unknown request ids, or from
//! shards not in the outstanding set, are logged and dropped.
//!
//! Finalization never depends on liveness: a reply from a member the sweep
//! has since marked dead still counts.

use crate::member::MemberTable;
use lumo_core::meta::{MetaFilter, MetadataStore};
use lumo_core::prompt::PromptMeta;
use lumo_core::ShardId;
use lumo_fusion::scorer::{FusionScorer, MetadataScores, RankedPhoto};
use lumo_proto::ShardHit;
use lumo_vector::{DistanceMetric, NO_RESULT};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How a search combines metadata and vector signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Metadata prefilter only; no shard is contacted.
    MetadataOnly,
    /// Vector search fanned out to every registered shard, raw ranking.
    VectorOnly,
    /// Candidate shards only, scores fused adaptively.
    MetaFusion,
}

/// Decides how long the gather phase waits for stragglers.
pub trait GatherPolicy: Send + Sync {
    /// Age after which an incomplete request is force-finalized with the
    /// partial results collected so far. `None` waits forever.
    fn deadline(&self) -> Option<Duration>;
}

/// Baseline policy: a request with an unresponsive target stays pending
/// until every reply arrives.
pub struct WaitForAll;

impl GatherPolicy for WaitForAll {
    fn deadline(&self) -> Option<Duration> {
        None
    }
}

/// Force-finalize with partial results once a request reaches this age.
pub struct Deadline(pub Duration);

impl GatherPolicy for Deadline {
    fn deadline(&self) -> Option<Duration> {
        Some(self.0)
    }
}

/// Scatter targets for one request: `(shard_id, per-shard k)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScatterPlan {
    pub request_id: String,
    pub targets: Vec<(ShardId, u32)>,
}

/// Outcome of planning a search.
#[derive(Debug)]
pub enum SearchPlan {
    /// The metadata prefilter matched nothing; answer empty without
    /// contacting any shard.
    Empty,
    /// Metadata-only answer straight from the store.
    Local(Vec<String>),
    /// Fan out to shards.
    Scatter(ScatterPlan),
}

struct PendingSearch {
    prompt: String,
    mode: SearchMode,
    outstanding: HashSet<ShardId>,
    partials: Vec<ShardHit>,
    meta: MetadataScores,
    candidate_ids: Option<HashSet<String>>,
    output_dir: Option<PathBuf>,
    started: Instant,
}

/// A finalized search, ready for presentation.
#[derive(Debug)]
pub struct FinalizedSearch {
    pub request_id: String,
    pub prompt: String,
    pub mode: SearchMode,
    pub ranked: Vec<RankedPhoto>,
    /// Surviving hits after sentinel filtering and trimming; `get`
    /// requests read inlined payloads from here.
    pub hits: Vec<ShardHit>,
    pub w_m: f64,
    pub w_v: f64,
    pub output_dir: Option<PathBuf>,
    /// True when a deadline policy finalized with replies still missing.
    pub partial: bool,
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Baseline per-shard k when the metadata count does not raise it.
    pub default_k: u32,
    /// Fraction of worst raw results dropped before fusion.
    pub trim_fraction: f64,
    /// Metric the shard indices rank with; decides best-first order.
    pub metric: DistanceMetric,
    /// Minimum final score presented to the user.
    pub presentation_threshold: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_k: 500,
            trim_fraction: 0.1,
            metric: DistanceMetric::SquaredEuclidean,
            presentation_threshold: 0.5,
        }
    }
}

/// Aggregates scatter-gather search state on the leader.
pub struct QueryCoordinator {
    config: CoordinatorConfig,
    scorer: FusionScorer,
    policy: Box<dyn GatherPolicy>,
    pending: Mutex<HashMap<String, PendingSearch>>,
    next_id: AtomicU64,
}

impl QueryCoordinator {
    pub fn new(config: CoordinatorConfig, policy: Box<dyn GatherPolicy>) -> Self {
        let scorer = FusionScorer::new(config.presentation_threshold);
        Self {
            config,
            scorer,
            policy,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Plan a search and, for scatter modes, register the pending request
    /// before any message is sent so no reply can race the registration.
    pub fn plan(
        &self,
        prompt: &str,
        meta: &PromptMeta,
        mode: SearchMode,
        output_dir: Option<PathBuf>,
        members: &MemberTable,
        store: &dyn MetadataStore,
    ) -> SearchPlan {
        let filter = MetaFilter {
            time_range: meta.time_range,
            bboxes: meta.locations.iter().map(|l| l.bbox).collect(),
        };

        let targets: Vec<(ShardId, u32)> = match mode {
            SearchMode::MetadataOnly => {
                let ids = store
                    .fetch_all(&filter)
                    .into_iter()
                    .map(|r| r.photo_id)
                    .collect();
                return SearchPlan::Local(ids);
            }
            SearchMode::VectorOnly => members
                .shard_ids()
                .into_iter()
                .map(|id| (id, self.config.default_k))
                .collect(),
            SearchMode::MetaFusion => {
                let counts = store.count_by_shard(&filter);
                if counts.is_empty() {
                    tracing::info!(prompt, "no metadata candidates, skipping vector search");
                    return SearchPlan::Empty;
                }
                counts
                    .into_iter()
                    .map(|(id, count)| {
                        let k = (2 * count).max(self.config.default_k as u64) as u32;
                        (id, k)
                    })
                    .collect()
            }
        };
        if targets.is_empty() {
            return SearchPlan::Empty;
        }

        let candidate_ids = match mode {
            SearchMode::MetaFusion => {
                let shard_ids: Vec<ShardId> = targets.iter().map(|(id, _)| *id).collect();
                Some(
                    store
                        .fetch(&filter, &shard_ids)
                        .into_iter()
                        .map(|r| r.photo_id)
                        .collect::<HashSet<String>>(),
                )
            }
            _ => None,
        };
        let meta_scores = match mode {
            SearchMode::MetaFusion => self.scorer.metadata_scores(meta, store),
            _ => MetadataScores::default(),
        };

        let request_id = format!("search-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let pending = PendingSearch {
            prompt: prompt.to_string(),
            mode,
            outstanding: targets.iter().map(|(id, _)| *id).collect(),
            partials: Vec::new(),
            meta: meta_scores,
            candidate_ids,
            output_dir,
            started: Instant::now(),
        };
        self.pending.lock().insert(request_id.clone(), pending);
        tracing::info!(request_id, ?mode, targets = targets.len(), "planned search");
        SearchPlan::Scatter(ScatterPlan {
            request_id,
            targets,
        })
    }

    /// Record one shard reply. Returns the finalized search when this was
    /// the last outstanding shard; the removal from the pending map and the
    /// empty-check happen under one lock, so two racing final replies
    /// cannot both finalize.
    pub fn on_reply(
        &self,
        shard_id: ShardId,
        request_id: &str,
        results: Vec<ShardHit>,
        store: &dyn MetadataStore,
    ) -> Option<FinalizedSearch> {
        let pending = {
            let mut map = self.pending.lock();
            let entry = match map.get_mut(request_id) {
                Some(entry) => entry,
                None => {
                    tracing::warn!(shard_id, request_id, "reply for unknown request, dropping");
                    return None;
                }
            };
            if !entry.outstanding.remove(&shard_id) {
                tracing::warn!(shard_id, request_id, "duplicate reply, dropping");
                return None;
            }
            entry.partials.extend(results);
            if !entry.outstanding.is_empty() {
                return None;
            }
            // Last reply: claim the request while still holding the lock.
            map.remove(request_id)
        }?;
        Some(self.finalize(request_id.to_string(), pending, store, false))
    }

    /// Force-finalize requests older than the gather policy's deadline.
    /// A no-op under [`WaitForAll`].
    pub fn expire(&self, store: &dyn MetadataStore) -> Vec<FinalizedSearch> {
        let deadline = match self.policy.deadline() {
            Some(d) => d,
            None => return Vec::new(),
        };
        let expired: Vec<(String, PendingSearch)> = {
            let mut map = self.pending.lock();
            let ids: Vec<String> = map
                .iter()
                .filter(|(_, p)| p.started.elapsed() >= deadline)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| map.remove(&id).map(|p| (id, p)))
                .collect()
        };
        expired
            .into_iter()
            .map(|(id, pending)| {
                tracing::warn!(
                    request_id = id,
                    missing = pending.outstanding.len(),
                    "gather deadline hit, finalizing with partial results"
                );
                self.finalize(id, pending, store, true)
            })
            .collect()
    }

    /// Pending request count, for tests and diagnostics.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    fn finalize(
        &self,
        request_id: String,
        pending: PendingSearch,
        store: &dyn MetadataStore,
        partial: bool,
    ) -> FinalizedSearch {
        let metric = self.config.metric;
        let mut hits: Vec<ShardHit> = pending
            .partials
            .into_iter()
            .filter(|h| h.vector_id != NO_RESULT)
            .collect();
        hits.sort_by(|a, b| {
            if metric.is_better(a.score, b.score) {
                std::cmp::Ordering::Less
            } else if metric.is_better(b.score, a.score) {
                std::cmp::Ordering::Greater
            } else {
                std::cmp::Ordering::Equal
            }
        });
        // Drop the worst fraction to bound result volume.
        let keep = hits.len() - (hits.len() as f64 * self.config.trim_fraction).floor() as usize;
        hits.truncate(keep);

        let (ranked, w_m, w_v) = match pending.mode {
            SearchMode::MetaFusion => {
                let merged: Vec<(String, f32)> = hits
                    .iter()
                    .map(|h| (h.photo_id.clone(), h.score))
                    .collect();
                let vector_scores = self
                    .scorer
                    .vector_scores(&merged, pending.meta.scores.len());
                let avail = store.availability();
                let availability =
                    avail.location * pending.meta.w_loc + avail.time * pending.meta.w_time;
                let out = self.scorer.fuse(
                    &pending.meta,
                    &vector_scores,
                    availability,
                    pending.candidate_ids.as_ref(),
                );
                (out.ranked, out.w_m, out.w_v)
            }
            _ => {
                // Raw best-first ranking, scores as the metric produced them.
                let ranked = hits
                    .iter()
                    .map(|h| RankedPhoto {
                        photo_id: h.photo_id.clone(),
                        score: h.score as f64,
                    })
                    .collect();
                (ranked, 0.0, 1.0)
            }
        };

        tracing::info!(
            request_id,
            results = ranked.len(),
            partial,
            "finalized search"
        );
        FinalizedSearch {
            request_id,
            prompt: pending.prompt,
            mode: pending.mode,
            ranked,
            hits,
            w_m,
            w_v,
            output_dir: pending.output_dir,
            partial,
        }
    }
}
