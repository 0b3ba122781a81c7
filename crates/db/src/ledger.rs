//! Ledger operations consumed by the pipeline stages.
//!
//! Every write that can race with another run is a conditional update scoped to
//! the row's current state. The boolean results report whether the guard matched.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::status::DealStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownManifest {
    pub id: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewManifest {
    pub id: String,
    pub drive_serial: Option<String>,
    pub validated_at: DateTime<Utc>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewManifestEntry {
    pub manifest_id: String,
    pub claimed_root_cid: String,
    pub local_path: String,
    pub meta: serde_json::Value,
}

/// Everything one ingestion run writes, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct ManifestBatch {
    pub drives: Vec<String>,
    pub manifests: Vec<NewManifest>,
    pub entries: Vec<NewManifestEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingProposal {
    pub provider: String,
    pub piece_cid: String,
    pub client: String,
    pub payload: serde_json::Value,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedDeal {
    pub piece_cid: String,
    pub status: DealStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealRecord {
    pub deal_id: i64,
    pub piece_cid: String,
    pub label: Option<String>,
    pub provider: String,
    /// Robust address of the client.
    pub client: String,
    pub verified: bool,
    pub start_epoch: i64,
    pub end_epoch: i64,
    pub status: DealStatus,
    pub status_detail: Option<String>,
    pub sector_start_epoch: Option<i64>,
}

#[async_trait]
pub trait ManifestLedger: Send + Sync {
    async fn known_manifests(&self) -> Result<Vec<KnownManifest>>;

    async fn known_drive_serials(&self) -> Result<HashSet<String>>;

    /// Apply the batch and the root CID backfill in one transaction. Returns the
    /// number of pieces whose root CID was promoted.
    async fn ingest_manifests(&self, batch: ManifestBatch) -> Result<u64>;
}

#[async_trait]
pub trait ProposalLedger: Send + Sync {
    /// Proposals with neither a success nor a failure recorded, ordered by
    /// `start_time` then `piece_cid`.
    async fn pending_proposals(&self) -> Result<Vec<PendingProposal>>;

    /// Returns false when the proposal was no longer unresolved.
    async fn record_proposal_success(&self, provider: &str, piece_cid: &str, success_cid: &str) -> Result<bool>;

    async fn record_proposal_failure(&self, provider: &str, piece_cid: &str, failure: &str) -> Result<bool>;
}

#[async_trait]
pub trait DealLedger: Send + Sync {
    async fn eligible_pieces(&self) -> Result<HashSet<String>>;

    /// Deals already recorded for eligible pieces, keyed by deal id.
    async fn tracked_deals(&self) -> Result<HashMap<i64, TrackedDeal>>;

    async fn verified_clients(&self) -> Result<Vec<String>>;

    async fn known_providers(&self) -> Result<HashSet<String>>;

    /// Idempotent; an existing provider is left untouched.
    async fn register_provider(&self, address: &str) -> Result<()>;

    /// Insert or update a deal, refusing transitions the status machine forbids.
    /// Returns the status the row had before this write, `None` for a new row.
    async fn upsert_deal(&self, deal: &DealRecord) -> Result<Option<DealStatus>>;

    /// Set the active-deal backlink on the successful proposal matching the deal,
    /// only if no backlink is set yet.
    async fn link_active_deal(&self, deal_id: i64, piece_cid: &str, provider: &str, client: &str) -> Result<bool>;

    /// Force the given deals to `terminated` unless already there. Returns rows changed.
    async fn sweep_missing_deals(&self, deal_ids: &[i64], detail: &str) -> Result<u64>;

    async fn update_client_datacap(&self, address: &str, outstanding: i64, allowance: Option<String>) -> Result<()>;
}
