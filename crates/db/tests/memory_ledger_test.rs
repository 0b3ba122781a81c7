use chrono::{TimeZone, Utc};
use db::{
    DealLedger, DealRecord, DealStatus, FailurePoint, ManifestBatch, ManifestLedger, MemoryLedger, NewManifest,
    NewManifestEntry, PieceRecord, ProposalLedger, ProposalRecord,
};
use serde_json::json;

fn deal(id: i64, status: DealStatus, detail: &str) -> DealRecord {
    DealRecord {
        deal_id: id,
        piece_cid: "baga-piece".to_string(),
        label: Some("bafy-root".to_string()),
        provider: "f01000".to_string(),
        client: "f1client".to_string(),
        verified: true,
        start_epoch: 100,
        end_epoch: 1_000_000,
        status,
        status_detail: Some(detail.to_string()),
        sector_start_epoch: None,
    }
}

#[tokio::test]
async fn test_upsert_reports_prior_status_and_enforces_transitions() {
    let ledger = MemoryLedger::new();

    assert_eq!(ledger.upsert_deal(&deal(1, DealStatus::Published, "p")).await.unwrap(), None);

    let mut active = deal(1, DealStatus::Active, "a");
    active.sector_start_epoch = Some(150);
    assert_eq!(
        ledger.upsert_deal(&active).await.unwrap(),
        Some(DealStatus::Published)
    );

    // an active deal never goes back to published, and keeps its sector start
    assert_eq!(
        ledger.upsert_deal(&deal(1, DealStatus::Published, "p")).await.unwrap(),
        Some(DealStatus::Active)
    );
    let stored = ledger.deal(1).await.unwrap();
    assert_eq!(stored.status, DealStatus::Active);
    assert_eq!(stored.status_detail.as_deref(), Some("a"));
    assert_eq!(stored.sector_start_epoch, Some(150));

    ledger.upsert_deal(&deal(1, DealStatus::Terminated, "t")).await.unwrap();
    ledger.upsert_deal(&deal(1, DealStatus::Active, "a2")).await.unwrap();
    let stored = ledger.deal(1).await.unwrap();
    assert_eq!(stored.status, DealStatus::Terminated);
    assert_eq!(stored.status_detail.as_deref(), Some("t"));
}

#[tokio::test]
async fn test_proposal_outcomes_are_written_once() {
    let ledger = MemoryLedger::new();
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    ledger
        .insert_proposal(ProposalRecord::pending("f01000", "baga-b", "f1client", start))
        .await;
    ledger
        .insert_proposal(ProposalRecord::pending("f01000", "baga-a", "f1client", start))
        .await;

    let pending = ledger.pending_proposals().await.unwrap();
    let order: Vec<&str> = pending.iter().map(|p| p.piece_cid.as_str()).collect();
    assert_eq!(order, vec!["baga-a", "baga-b"]);

    assert!(ledger.record_proposal_success("f01000", "baga-a", "bafy-ok").await.unwrap());
    assert!(!ledger.record_proposal_failure("f01000", "baga-a", "1 : late").await.unwrap());
    assert!(!ledger.record_proposal_success("f01000", "baga-a", "bafy-other").await.unwrap());

    let stored = ledger.proposal("f01000", "baga-a").await.unwrap();
    assert_eq!(stored.success_cid.as_deref(), Some("bafy-ok"));
    assert!(stored.failure_text.is_empty());
    assert_eq!(ledger.pending_proposals().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_backlink_requires_success_and_is_set_once() {
    let ledger = MemoryLedger::new();
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    ledger
        .insert_proposal(ProposalRecord::pending("f01000", "baga-piece", "f1client", start))
        .await;

    assert!(!ledger.link_active_deal(7, "baga-piece", "f01000", "f1client").await.unwrap());

    ledger
        .record_proposal_success("f01000", "baga-piece", "bafy-ok")
        .await
        .unwrap();
    assert!(!ledger.link_active_deal(7, "baga-piece", "f01000", "f1other").await.unwrap());
    assert!(ledger.link_active_deal(7, "baga-piece", "f01000", "f1client").await.unwrap());
    assert!(!ledger.link_active_deal(8, "baga-piece", "f01000", "f1client").await.unwrap());

    let stored = ledger.proposal("f01000", "baga-piece").await.unwrap();
    assert_eq!(stored.active_deal_id, Some(7));
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let ledger = MemoryLedger::new();
    ledger.insert_deal(deal(1, DealStatus::Published, "p")).await;
    ledger.insert_deal(deal(2, DealStatus::Terminated, "t")).await;

    assert_eq!(ledger.sweep_missing_deals(&[1, 2, 3], "gone").await.unwrap(), 1);
    assert_eq!(ledger.sweep_missing_deals(&[1, 2, 3], "gone").await.unwrap(), 0);
    assert_eq!(ledger.deal(2).await.unwrap().status_detail.as_deref(), Some("t"));
}

#[tokio::test]
async fn test_ingest_backfills_roots_and_rolls_back_on_failure() {
    let ledger = MemoryLedger::new();
    ledger
        .insert_piece(PieceRecord {
            piece_cid: "baga-1".to_string(),
            root_cid: None,
            claimed_root_cid: Some("bafy-1".to_string()),
            payload_size: Some(1024),
            size: 2048,
        })
        .await;
    ledger
        .insert_piece(PieceRecord {
            piece_cid: "baga-2".to_string(),
            root_cid: None,
            claimed_root_cid: Some("bafy-2".to_string()),
            payload_size: Some(4096),
            size: 8192,
        })
        .await;

    let uploaded = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let batch = ManifestBatch {
        drives: vec!["ZA1B2C3D".to_string()],
        manifests: vec![NewManifest {
            id: "run-1".to_string(),
            drive_serial: Some("ZA1B2C3D".to_string()),
            validated_at: uploaded,
            uploaded_at: uploaded,
        }],
        entries: vec![
            NewManifestEntry {
                manifest_id: "run-1".to_string(),
                claimed_root_cid: "bafy-1".to_string(),
                local_path: "/mnt/a/1.car".to_string(),
                meta: json!({"valid_size": true, "valid_header": true, "valid_commp": false, "size": 1024}),
            },
            // size mismatch: not promoted
            NewManifestEntry {
                manifest_id: "run-1".to_string(),
                claimed_root_cid: "bafy-2".to_string(),
                local_path: "/mnt/a/2.car".to_string(),
                meta: json!({"valid_size": true, "valid_header": true, "valid_commp": true, "size": 4095}),
            },
        ],
    };

    ledger.fail_on(FailurePoint::Ingest).await;
    assert!(ledger.ingest_manifests(batch.clone()).await.is_err());
    assert!(ledger.manifests().await.is_empty());
    assert!(ledger.drives().await.is_empty());

    ledger.clear_failures().await;
    assert_eq!(ledger.ingest_manifests(batch.clone()).await.unwrap(), 1);
    assert_eq!(ledger.piece("baga-1").await.unwrap().root_cid.as_deref(), Some("bafy-1"));
    assert_eq!(ledger.piece("baga-2").await.unwrap().root_cid, None);
    assert_eq!(ledger.manifest_entries().await.len(), 2);

    // re-applying the same manifest violates its primary key and changes nothing
    assert!(ledger.ingest_manifests(batch).await.is_err());
    assert_eq!(ledger.manifests().await.len(), 1);
}
