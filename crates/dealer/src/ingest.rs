//! Ingestion of new validation manifests into the ledger.
//!
//! The bucket is listed in full on every run and compared with the ledger, so a
//! run needs no prior state. New manifests are written in one transaction
//! together with the root CID backfill; any failure leaves the ledger untouched.

use chrono::{DateTime, Utc};
use db::{ManifestBatch, ManifestLedger, NewManifest};
use futures::{StreamExt, TryStreamExt, stream};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use storage::ManifestBucket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{DealerError, Result};
use crate::manifest::{DriveSerialPattern, ManifestDocument};

/// Manifest bodies fetched concurrently.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Manifests in the ledger after this run.
    pub known_manifests: usize,
    pub newly_processed: usize,
    pub new_drives: usize,
    pub new_entries: usize,
    /// Pieces whose root CID was promoted by the backfill.
    pub new_roots: u64,
}

pub struct ManifestIngestor {
    bucket: Arc<dyn ManifestBucket>,
    ledger: Arc<dyn ManifestLedger>,
    serials: DriveSerialPattern,
    fetch_concurrency: usize,
}

impl ManifestIngestor {
    pub fn new(bucket: Arc<dyn ManifestBucket>, ledger: Arc<dyn ManifestLedger>) -> Result<Self> {
        Ok(Self {
            bucket,
            ledger,
            serials: DriveSerialPattern::new()?,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
        })
    }

    pub fn with_fetch_concurrency(mut self, fetch_concurrency: usize) -> Self {
        self.fetch_concurrency = fetch_concurrency.max(1);
        self
    }

    pub async fn ingest(&self, token: &CancellationToken) -> Result<IngestStats> {
        let mut stats = IngestStats::default();
        let result = self.run(token, &mut stats).await;

        info!(
            "summary: known_manifests={} newly_processed={} new_drives={} new_entries={} new_roots={}",
            stats.known_manifests, stats.newly_processed, stats.new_drives, stats.new_entries, stats.new_roots
        );
        result.map(|()| stats)
    }

    async fn run(&self, token: &CancellationToken, stats: &mut IngestStats) -> Result<()> {
        let listing = token
            .run_until_cancelled(self.bucket.list_manifests())
            .await
            .ok_or(DealerError::Cancelled)??;
        let mut remote: HashMap<String, DateTime<Utc>> =
            listing.into_iter().map(|m| (m.id, m.uploaded_at)).collect();
        debug!("Bucket lists {} manifests", remote.len());

        let known = token
            .run_until_cancelled(self.ledger.known_manifests())
            .await
            .ok_or(DealerError::Cancelled)??;
        stats.known_manifests = known.len();

        for manifest in known {
            if let Some(uploaded_at) = remote.remove(&manifest.id) {
                if uploaded_at != manifest.uploaded_at {
                    return Err(DealerError::ManifestClockMismatch {
                        id: manifest.id,
                        stored: manifest.uploaded_at,
                        remote: uploaded_at,
                    });
                }
            }
        }

        if remote.is_empty() {
            debug!("No new manifests");
            return Ok(());
        }

        let mut new_manifests: Vec<(String, DateTime<Utc>)> = remote.into_iter().collect();
        new_manifests.sort();
        info!("Processing {} new manifests", new_manifests.len());

        let fetches = stream::iter(new_manifests)
            .map(|(id, uploaded_at)| async move {
                let body = self
                    .bucket
                    .fetch_manifest(&id)
                    .await
                    .map_err(|e| anyhow::anyhow!("fetching manifest '{}' failed: {}", id, e))?;
                let document = ManifestDocument::decode(&id, &body)?;
                Ok::<_, DealerError>((id, uploaded_at, document))
            })
            .buffered(self.fetch_concurrency)
            .try_collect::<Vec<_>>();
        let documents: Vec<(String, DateTime<Utc>, ManifestDocument)> = token
            .run_until_cancelled(fetches)
            .await
            .ok_or(DealerError::Cancelled)??;

        let known_drives = self.ledger.known_drive_serials().await?;
        let mut drives = BTreeSet::new();
        let mut batch = ManifestBatch::default();

        for (id, uploaded_at, document) in &documents {
            let drive_serial = self.serials.extract(&document.drive_identifier);
            match &drive_serial {
                Some(serial) if !known_drives.contains(serial) => {
                    drives.insert(serial.clone());
                }
                Some(_) => {}
                None => debug!(
                    "No drive serial in identifier '{}' of manifest {}",
                    document.drive_identifier, id
                ),
            }

            batch.manifests.push(NewManifest {
                id: id.clone(),
                drive_serial,
                validated_at: document.validation_start,
                uploaded_at: *uploaded_at,
            });
            batch.entries.extend(document.entries(id)?);
        }
        batch.drives = drives.into_iter().collect();

        if token.is_cancelled() {
            return Err(DealerError::Cancelled);
        }

        let (new_drives, new_entries, newly_processed) =
            (batch.drives.len(), batch.entries.len(), batch.manifests.len());
        // Not cancellable once the transaction starts
        let new_roots = self.ledger.ingest_manifests(batch).await?;

        stats.known_manifests += newly_processed;
        stats.newly_processed = newly_processed;
        stats.new_drives = new_drives;
        stats.new_entries = new_entries;
        stats.new_roots = new_roots;
        Ok(())
    }
}
