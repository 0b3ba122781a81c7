use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use db::{ManifestLedger, MemoryLedger, NewManifest, PieceRecord};
use dealer::{DealerError, ManifestIngestor};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use storage::{ManifestBucket, RemoteManifest};
use tokio_util::sync::CancellationToken;

struct FakeBucket {
    listing: Vec<RemoteManifest>,
    bodies: HashMap<String, Vec<u8>>,
    unreachable: Option<String>,
    fetches: AtomicUsize,
}

impl FakeBucket {
    fn new() -> Self {
        Self {
            listing: Vec::new(),
            bodies: HashMap::new(),
            unreachable: None,
            fetches: AtomicUsize::new(0),
        }
    }

    fn with_manifest(mut self, id: &str, uploaded_at: DateTime<Utc>, body: String) -> Self {
        self.listing.push(RemoteManifest {
            id: id.to_string(),
            uploaded_at,
        });
        self.bodies.insert(id.to_string(), body.into_bytes());
        self
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManifestBucket for FakeBucket {
    async fn list_manifests(&self) -> anyhow::Result<Vec<RemoteManifest>> {
        Ok(self.listing.clone())
    }

    async fn fetch_manifest(&self, id: &str) -> anyhow::Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.as_deref() == Some(id) {
            return Err(anyhow!("connection reset"));
        }
        self.bodies
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("NoSuchKey: manifests/{}.json", id))
    }
}

fn uploaded() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 3, 2, 9, 15, 0).unwrap()
}

fn manifest_body(drive: &str, root: &str, size: i64, commp_ok: bool) -> String {
    serde_json::json!({
        "DriveIdentifier": drive,
        "ValidationStart": "2021-03-01T10:00:00Z",
        "ValidationFinish": "2021-03-01T18:30:00Z",
        "SoftFailures": 0,
        "HardFailures": 0,
        "Flawless": 1,
        "CarfilesPerDataset": {"3": 1},
        "Carfiles": {
            root: {
                "FullPath": format!("/mnt/drive/3/{}.car", root),
                "DatasetID": 3,
                "ByteSize": size,
                "ByteSizeValidated": true,
                "CarHeaderValidated": false,
                "CommpValidated": commp_ok,
                "SoftFails": null,
                "HardFails": null
            }
        }
    })
    .to_string()
}

async fn seeded_ledger() -> MemoryLedger {
    let ledger = MemoryLedger::new();
    for (piece, root, size) in [("baga-1", "bafy-1", 1000), ("baga-2", "bafy-2", 2000)] {
        ledger
            .insert_piece(PieceRecord {
                piece_cid: piece.to_string(),
                root_cid: None,
                claimed_root_cid: Some(root.to_string()),
                payload_size: Some(size),
                size: size * 2,
            })
            .await;
    }
    ledger
}

#[tokio::test]
async fn test_ingests_new_manifests_and_backfills_roots() {
    let ledger = seeded_ledger().await;
    let bucket = FakeBucket::new()
        .with_manifest("ZL2AB3CD-1", uploaded(), manifest_body("ST16000 Serial Number: ZL2AB3CD", "bafy-1", 1000, true))
        .with_manifest("ZL2AB3CD-2", uploaded() + Duration::hours(1), manifest_body("ST16000 Serial Number: ZL2AB3CD", "bafy-2", 1999, true))
        .with_manifest("unlabelled", uploaded(), manifest_body("usb enclosure", "bafy-3", 10, false));

    let ingestor = ManifestIngestor::new(Arc::new(bucket), Arc::new(ledger.clone())).unwrap();
    let stats = ingestor.ingest(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.newly_processed, 3);
    assert_eq!(stats.known_manifests, 3);
    assert_eq!(stats.new_drives, 1);
    assert_eq!(stats.new_entries, 3);
    // bafy-2 was declared with the wrong size
    assert_eq!(stats.new_roots, 1);

    assert_eq!(ledger.piece("baga-1").await.unwrap().root_cid.as_deref(), Some("bafy-1"));
    assert_eq!(ledger.piece("baga-2").await.unwrap().root_cid, None);
    assert_eq!(ledger.drives().await, vec!["ZL2AB3CD".to_string()]);

    let manifests = ledger.manifests().await;
    let second = manifests.iter().find(|m| m.id == "ZL2AB3CD-2").unwrap();
    assert_eq!(second.uploaded_at, uploaded() + Duration::hours(1));
    assert_eq!(second.drive_serial.as_deref(), Some("ZL2AB3CD"));
    let unlabelled = manifests.iter().find(|m| m.id == "unlabelled").unwrap();
    assert_eq!(unlabelled.drive_serial, None);

    let entry = ledger
        .manifest_entries()
        .await
        .into_iter()
        .find(|e| e.claimed_root_cid == "bafy-1")
        .unwrap();
    assert_eq!(
        entry.meta,
        serde_json::json!({"valid_size": true, "valid_header": false, "valid_commp": true, "size": 1000})
    );
}

#[tokio::test]
async fn test_rerun_against_synced_ledger_writes_nothing() {
    let ledger = seeded_ledger().await;
    let bucket = Arc::new(
        FakeBucket::new().with_manifest("run-1", uploaded(), manifest_body("S/N WX1234", "bafy-1", 1000, true)),
    );
    let ingestor = ManifestIngestor::new(bucket.clone(), Arc::new(ledger.clone())).unwrap();

    ingestor.ingest(&CancellationToken::new()).await.unwrap();
    let writes = ledger.write_count();
    let fetches = bucket.fetches();

    let stats = ingestor.ingest(&CancellationToken::new()).await.unwrap();
    assert_eq!(stats.newly_processed, 0);
    assert_eq!(stats.known_manifests, 1);
    assert_eq!(ledger.write_count(), writes);
    assert_eq!(bucket.fetches(), fetches);
}

#[tokio::test]
async fn test_known_drive_is_not_inserted_again() {
    let ledger = seeded_ledger().await;
    let first = FakeBucket::new().with_manifest("run-1", uploaded(), manifest_body("S/N WX1234", "bafy-1", 1000, true));
    ManifestIngestor::new(Arc::new(first), Arc::new(ledger.clone()))
        .unwrap()
        .ingest(&CancellationToken::new())
        .await
        .unwrap();

    let second = FakeBucket::new()
        .with_manifest("run-1", uploaded(), manifest_body("S/N WX1234", "bafy-1", 1000, true))
        .with_manifest("run-2", uploaded(), manifest_body("S/N WX1234", "bafy-2", 2000, true));
    let stats = ManifestIngestor::new(Arc::new(second), Arc::new(ledger.clone()))
        .unwrap()
        .ingest(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(stats.newly_processed, 1);
    assert_eq!(stats.new_drives, 0);
    assert_eq!(stats.new_roots, 1);
    assert_eq!(ledger.known_drive_serials().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_clock_mismatch_aborts_without_writes() {
    let ledger = seeded_ledger().await;
    ledger
        .insert_manifest(NewManifest {
            id: "run-1".to_string(),
            drive_serial: None,
            validated_at: uploaded(),
            uploaded_at: uploaded(),
        })
        .await;

    let bucket = Arc::new(
        FakeBucket::new()
            .with_manifest("run-1", uploaded() + Duration::seconds(1), manifest_body("x", "bafy-1", 1000, true))
            .with_manifest("run-2", uploaded(), manifest_body("x", "bafy-2", 2000, true)),
    );
    let ingestor = ManifestIngestor::new(bucket.clone(), Arc::new(ledger.clone())).unwrap();

    let err = ingestor.ingest(&CancellationToken::new()).await.unwrap_err();
    match err {
        DealerError::ManifestClockMismatch { id, stored, remote } => {
            assert_eq!(id, "run-1");
            assert_eq!(stored, uploaded());
            assert_eq!(remote, uploaded() + Duration::seconds(1));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(ledger.write_count(), 0);
    assert_eq!(bucket.fetches(), 0);
    assert_eq!(ledger.manifests().await.len(), 1);
}

#[tokio::test]
async fn test_single_bad_manifest_aborts_whole_run() {
    let ledger = seeded_ledger().await;
    let bucket = FakeBucket::new()
        .with_manifest("run-1", uploaded(), manifest_body("S/N WX1234", "bafy-1", 1000, true))
        .with_manifest("run-2", uploaded(), "{\"DriveIdentifier\": 12".to_string());

    let ingestor = ManifestIngestor::new(Arc::new(bucket), Arc::new(ledger.clone())).unwrap();
    let err = ingestor.ingest(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, DealerError::ManifestDecode { ref id, .. } if id == "run-2"));
    assert_eq!(ledger.write_count(), 0);
    assert!(ledger.manifests().await.is_empty());
    assert!(ledger.drives().await.is_empty());
}

#[tokio::test]
async fn test_fetch_failure_aborts_whole_run() {
    let ledger = seeded_ledger().await;
    let mut bucket = FakeBucket::new()
        .with_manifest("run-1", uploaded(), manifest_body("S/N WX1234", "bafy-1", 1000, true))
        .with_manifest("run-2", uploaded(), manifest_body("S/N WX5678", "bafy-2", 2000, true));
    bucket.unreachable = Some("run-1".to_string());

    let ingestor = ManifestIngestor::new(Arc::new(bucket), Arc::new(ledger.clone()))
        .unwrap()
        .with_fetch_concurrency(1);
    let err = ingestor.ingest(&CancellationToken::new()).await.unwrap_err();

    assert!(err.to_string().contains("run-1"));
    assert_eq!(ledger.write_count(), 0);
}

#[tokio::test]
async fn test_cancelled_run_writes_nothing() {
    let ledger = seeded_ledger().await;
    let bucket = FakeBucket::new().with_manifest("run-1", uploaded(), manifest_body("S/N WX1234", "bafy-1", 1000, true));
    let token = CancellationToken::new();
    token.cancel();

    let ingestor = ManifestIngestor::new(Arc::new(bucket), Arc::new(ledger.clone())).unwrap();
    assert!(matches!(ingestor.ingest(&token).await, Err(DealerError::Cancelled)));
    assert_eq!(ledger.write_count(), 0);
}
