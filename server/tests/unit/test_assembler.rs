//! Chunked upload assembly tests

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use fleetd::artifacts::meta::ArtifactMetadata;
use fleetd::artifacts::store::ArtifactStore;
use fleetd::retry::RetryPolicy;
use fleetd::upload::assembler::{UploadAssembler, UploadOptions};
use fleetd::utils::{generate_uuid, sha256_hex};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn test_meta() -> ArtifactMetadata {
    ArtifactMetadata::parse("com.example.kiosk", "2.1.0", 42, "release").unwrap()
}

async fn new_assembler() -> (Arc<ArtifactStore>, UploadAssembler) {
    let dir = std::env::temp_dir().join(format!("fleetd-test-{}", generate_uuid()));
    let store = Arc::new(ArtifactStore::open(dir, RetryPolicy::default()).await.unwrap());
    let assembler = UploadAssembler::new(store.clone(), UploadOptions::default());
    (store, assembler)
}

#[tokio::test]
async fn test_chunks_assemble_in_index_order_regardless_of_arrival() {
    let (_store, assembler) = new_assembler().await;
    let t0 = base_time();

    let chunk_a = vec![b'A'; 1024];
    let chunk_b = vec![b'B'; 1024];
    let chunk_c = vec![b'C'; 1024];

    let upload_id = assembler.begin_upload(3, "kiosk.apk".to_string(), t0).unwrap();

    // Arrival order 2, 0, 1; assembly must still be A, B, C
    assembler.put_chunk(&upload_id, 2, chunk_c.clone(), t0).unwrap();
    assembler.put_chunk(&upload_id, 0, chunk_a.clone(), t0).unwrap();
    assembler.put_chunk(&upload_id, 1, chunk_b.clone(), t0).unwrap();

    let artifact = assembler.complete_upload(&upload_id, test_meta(), t0).await.unwrap();

    let expected: Vec<u8> = [chunk_a, chunk_b, chunk_c].concat();
    assert_eq!(artifact.size, 3072);
    assert_eq!(artifact.digest, sha256_hex(&expected));
    assert_eq!(artifact.package_name, "com.example.kiosk");
}

#[tokio::test]
async fn test_duplicate_chunk_rules() {
    let (_store, assembler) = new_assembler().await;
    let t0 = base_time();

    let upload_id = assembler.begin_upload(2, "kiosk.apk".to_string(), t0).unwrap();
    assembler.put_chunk(&upload_id, 0, b"foo".to_vec(), t0).unwrap();

    // Retransmitting identical bytes is an accepted no-op
    assembler.put_chunk(&upload_id, 0, b"foo".to_vec(), t0).unwrap();

    // The same index with different bytes is a conflict
    let err = assembler.put_chunk(&upload_id, 0, b"bar".to_vec(), t0).unwrap_err();
    assert_eq!(err.kind(), "conflict");

    // An index outside the declared range is invalid
    let err = assembler.put_chunk(&upload_id, 2, b"baz".to_vec(), t0).unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn test_complete_with_missing_chunks_is_rejected() {
    let (_store, assembler) = new_assembler().await;
    let t0 = base_time();

    let upload_id = assembler.begin_upload(3, "kiosk.apk".to_string(), t0).unwrap();
    assembler.put_chunk(&upload_id, 0, b"first".to_vec(), t0).unwrap();
    assembler.put_chunk(&upload_id, 2, b"third".to_vec(), t0).unwrap();

    let err = assembler.complete_upload(&upload_id, test_meta(), t0).await.unwrap_err();
    assert_eq!(err.kind(), "validation");

    // The session survives the failed completion and can be finished
    assembler.put_chunk(&upload_id, 1, b"second".to_vec(), t0).unwrap();
    assembler.complete_upload(&upload_id, test_meta(), t0).await.unwrap();
}

#[tokio::test]
async fn test_complete_is_idempotent() {
    let (store, assembler) = new_assembler().await;
    let t0 = base_time();

    let upload_id = assembler.begin_upload(1, "kiosk.apk".to_string(), t0).unwrap();
    assembler.put_chunk(&upload_id, 0, b"payload".to_vec(), t0).unwrap();

    let first = assembler.complete_upload(&upload_id, test_meta(), t0).await.unwrap();
    let second = assembler
        .complete_upload(&upload_id, test_meta(), t0 + Duration::seconds(5))
        .await
        .unwrap();

    assert_eq!(first.artifact_id, second.artifact_id);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_identical_bytes_dedupe_across_uploads() {
    let (store, assembler) = new_assembler().await;
    let t0 = base_time();

    let payload = vec![0x7Fu8; 4096];

    let mut artifact_ids = Vec::new();
    for _ in 0..2 {
        let upload_id = assembler.begin_upload(1, "kiosk.apk".to_string(), t0).unwrap();
        assembler.put_chunk(&upload_id, 0, payload.clone(), t0).unwrap();
        let artifact = assembler.complete_upload(&upload_id, test_meta(), t0).await.unwrap();
        artifact_ids.push(artifact.artifact_id);
    }

    assert_eq!(artifact_ids[0], artifact_ids[1]);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_gc_discards_only_idle_sessions() {
    let (_store, assembler) = new_assembler().await;
    let t0 = base_time();

    let stale = assembler.begin_upload(2, "old.apk".to_string(), t0).unwrap();
    let fresh = assembler
        .begin_upload(2, "new.apk".to_string(), t0 + Duration::hours(23))
        .unwrap();

    // 25 hours later the first session is past the 24h retention
    let removed = assembler.gc(t0 + Duration::hours(25));
    assert_eq!(removed, 1);
    assert_eq!(assembler.session_count(), 1);

    let err = assembler
        .put_chunk(&stale, 0, b"late".to_vec(), t0 + Duration::hours(25))
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    assembler
        .put_chunk(&fresh, 0, b"fine".to_vec(), t0 + Duration::hours(25))
        .unwrap();
}

#[tokio::test]
async fn test_begin_upload_requires_chunks() {
    let (_store, assembler) = new_assembler().await;
    let err = assembler
        .begin_upload(0, "kiosk.apk".to_string(), base_time())
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let (_store, assembler) = new_assembler().await;
    let err = assembler
        .put_chunk("no-such-upload", 0, b"x".to_vec(), base_time())
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}
