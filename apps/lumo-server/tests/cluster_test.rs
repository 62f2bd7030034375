//! End-to-end cluster tests: a leader and several shards over the
//! in-memory transport mesh.

use lumo_cluster::{Deadline, SearchMode, UploadOutcome};
use lumo_core::{GeoBox, LocationMention, MetadataStore, PhotoMeta, PromptMeta, TimeRange};
use lumo_placement::photo_id_for_bytes;
use lumo_testkit::{ScriptedExtractor, ScriptedPhotoMeta, TestCluster};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn tokyo_bbox() -> GeoBox {
    GeoBox {
        min_lat: 34.9,
        max_lat: 35.1,
        min_lon: 138.9,
        max_lon: 139.1,
    }
}

fn shard_of(outcome: &UploadOutcome) -> u32 {
    match outcome {
        UploadOutcome::Routed { shard_id, .. } => *shard_id,
        other => panic!("expected routed upload, got {:?}", other),
    }
}

#[tokio::test]
async fn test_vector_search_ranks_identical_photo_first() {
    init_tracing();
    let mut cluster = TestCluster::start(3).await;
    let payloads: [&[u8]; 5] = [
        b"sunset over the bay",
        b"forest trail in fog",
        b"city lights from above",
        b"red bicycle on a wall",
        b"two cats on a sofa",
    ];
    for (i, payload) in payloads.iter().enumerate() {
        cluster.upload(&format!("p{i}.jpg"), payload).await;
    }

    // The stub embedder encodes a text prompt and an identical photo
    // payload to the same vector, so the match is exact.
    cluster
        .search("sunset over the bay", SearchMode::VectorOnly)
        .await;
    let result = cluster.next_result().await;

    assert!(!result.partial);
    assert_eq!(result.w_v, 1.0);
    assert_eq!(result.ranked.len(), payloads.len());
    assert_eq!(
        result.ranked[0].photo_id,
        photo_id_for_bytes(b"sunset over the bay")
    );
}

#[tokio::test]
async fn test_upload_is_idempotent_by_content() {
    init_tracing();
    let cluster = TestCluster::start(2).await;

    let first = cluster.upload("a.jpg", b"same pixels").await;
    let routed_id = match first {
        UploadOutcome::Routed { photo_id, .. } => photo_id,
        other => panic!("expected routed upload, got {:?}", other),
    };

    // Same bytes under a different name: dropped before any shard sees it.
    let second = cluster.upload("b.jpg", b"same pixels").await;
    assert_eq!(
        second,
        UploadOutcome::Duplicate {
            photo_id: routed_id
        }
    );
    assert_eq!(cluster.store.len(), 1);
}

#[tokio::test]
async fn test_meta_fusion_with_empty_store_answers_without_shards() {
    init_tracing();
    let extractor = Arc::new(ScriptedExtractor::new().with(
        "photos from tokyo",
        PromptMeta {
            locations: vec![LocationMention {
                bbox: tokyo_bbox(),
                weight: 1.0,
            }],
            ..Default::default()
        },
    ));
    let mut cluster = TestCluster::builder(2)
        .prompt_extractor(extractor)
        .start()
        .await;

    cluster
        .search("photos from tokyo", SearchMode::MetaFusion)
        .await;
    let result = cluster.next_result().await;
    assert!(result.ranked.is_empty());
    assert!(!result.partial);
}

#[tokio::test]
async fn test_metadata_only_search_filters_by_time() {
    init_tracing();
    let in_range: &[u8] = b"beach day";
    let out_of_range: &[u8] = b"ski trip";
    let prompt_extractor = Arc::new(ScriptedExtractor::new().with(
        "summer 2020",
        PromptMeta {
            time_range: Some(TimeRange::new(1_590_000_000, 1_600_000_000)),
            time_weight: 1.0,
            ..Default::default()
        },
    ));
    let photo_extractor = Arc::new(
        ScriptedPhotoMeta::new()
            .with(
                in_range,
                PhotoMeta {
                    timestamp: Some(1_595_000_000),
                    ..Default::default()
                },
            )
            .with(
                out_of_range,
                PhotoMeta {
                    timestamp: Some(1_620_000_000),
                    ..Default::default()
                },
            ),
    );
    let mut cluster = TestCluster::builder(2)
        .prompt_extractor(prompt_extractor)
        .photo_extractor(photo_extractor)
        .start()
        .await;
    cluster.upload("beach.jpg", in_range).await;
    cluster.upload("ski.jpg", out_of_range).await;

    cluster.search("summer 2020", SearchMode::MetadataOnly).await;
    let result = cluster.next_result().await;

    assert_eq!(result.ranked.len(), 1);
    assert_eq!(result.ranked[0].photo_id, photo_id_for_bytes(in_range));
}

#[tokio::test]
async fn test_meta_fusion_prefers_geo_matching_photo() {
    init_tracing();
    let tokyo: &[u8] = b"tokyo tower at night";
    let elsewhere: &[u8] = b"somewhere else entirely";
    let prompt_extractor = Arc::new(ScriptedExtractor::new().with(
        "tokyo",
        PromptMeta {
            locations: vec![LocationMention {
                bbox: tokyo_bbox(),
                weight: 1.0,
            }],
            ..Default::default()
        },
    ));
    let photo_extractor = Arc::new(ScriptedPhotoMeta::new().with(
        tokyo,
        PhotoMeta {
            lat: Some(35.0),
            lon: Some(139.0),
            ..Default::default()
        },
    ));
    let mut cluster = TestCluster::builder(2)
        .prompt_extractor(prompt_extractor)
        .photo_extractor(photo_extractor)
        .start()
        .await;
    cluster.upload("tokyo.jpg", tokyo).await;
    cluster.upload("other.jpg", elsewhere).await;

    cluster.search("tokyo", SearchMode::MetaFusion).await;
    let result = cluster.next_result().await;

    assert!(!result.ranked.is_empty());
    assert_eq!(result.ranked[0].photo_id, photo_id_for_bytes(tokyo));
    assert!(result.ranked[0].score > 0.7);
    assert!(result.w_m > 0.0 && result.w_m < 1.0);
}

#[tokio::test]
async fn test_get_saves_ranked_photos_to_output_dir() {
    init_tracing();
    let tokyo: &[u8] = b"tokyo tower at night";
    let prompt_extractor = Arc::new(ScriptedExtractor::new().with(
        "tokyo",
        PromptMeta {
            locations: vec![LocationMention {
                bbox: tokyo_bbox(),
                weight: 1.0,
            }],
            ..Default::default()
        },
    ));
    let photo_extractor = Arc::new(ScriptedPhotoMeta::new().with(
        tokyo,
        PhotoMeta {
            lat: Some(35.0),
            lon: Some(139.0),
            ..Default::default()
        },
    ));
    let mut cluster = TestCluster::builder(1)
        .prompt_extractor(prompt_extractor)
        .photo_extractor(photo_extractor)
        .start()
        .await;
    cluster.upload("tokyo.jpg", tokyo).await;

    let out_dir = cluster.scratch_dir().join("fetched");
    cluster
        .leader
        .get("tokyo", out_dir.clone())
        .await
        .expect("get failed");
    let result = cluster.next_result().await;

    assert_eq!(result.output_dir.as_deref(), Some(out_dir.as_path()));
    assert_eq!(result.ranked.len(), 1);
    let saved = std::fs::read(out_dir.join("tokyo.jpg")).expect("photo not saved");
    assert_eq!(saved, tokyo);
}

#[tokio::test]
async fn test_deadline_policy_finalizes_with_partial_results() {
    init_tracing();
    let mut cluster = TestCluster::builder(2)
        .gather_policy(Box::new(Deadline(Duration::from_millis(200))))
        .start()
        .await;

    let mut by_shard: Vec<HashSet<String>> = vec![HashSet::new(), HashSet::new()];
    for i in 0..6u8 {
        let payload = format!("photo number {i}");
        let outcome = cluster
            .upload(&format!("p{i}.jpg"), payload.as_bytes())
            .await;
        let shard = shard_of(&outcome) as usize;
        by_shard[shard].insert(photo_id_for_bytes(payload.as_bytes()));
    }

    // Shard 1 goes silent; its reply never reaches the leader.
    cluster.partition_shard(1, true);
    cluster.search("anything", SearchMode::VectorOnly).await;
    let result = cluster.next_result().await;

    assert!(result.partial);
    for photo in &result.ranked {
        assert!(
            by_shard[0].contains(&photo.photo_id),
            "partial result leaked a photo from the silent shard"
        );
    }
}

#[tokio::test]
async fn test_wait_for_all_blocks_on_missing_reply() {
    init_tracing();
    let mut cluster = TestCluster::start(2).await;
    cluster.upload("a.jpg", b"first photo").await;
    cluster.upload("b.jpg", b"second photo").await;

    cluster.partition_shard(1, true);
    cluster.search("anything", SearchMode::VectorOnly).await;
    cluster.expect_no_result(Duration::from_millis(500)).await;
}

#[tokio::test]
async fn test_clear_resets_dedup_and_shard_state() {
    init_tracing();
    let mut cluster = TestCluster::start(1).await;
    cluster.upload("a.jpg", b"some pixels").await;
    assert!(matches!(
        cluster.upload("b.jpg", b"some pixels").await,
        UploadOutcome::Duplicate { .. }
    ));

    cluster.leader.clear().await;
    assert_eq!(cluster.store.len(), 0);
    cluster.wait_cleared(0).await;

    cluster.search("some pixels", SearchMode::VectorOnly).await;
    let result = cluster.next_result().await;
    assert!(result.ranked.is_empty());

    // Content dedup starts over after a clear.
    assert!(matches!(
        cluster.upload("a.jpg", b"some pixels").await,
        UploadOutcome::Routed { .. }
    ));
}

#[tokio::test]
async fn test_silent_shard_is_marked_dead() {
    init_tracing();
    let cluster = TestCluster::start(3).await;
    assert_eq!(cluster.alive_count(), 3);

    cluster.partition_shard(2, true);
    cluster.wait_alive(2).await;
}
