//! In-memory ledger for tests and local runs.
//!
//! Mirrors the conditional-write semantics of the Postgres ledger row for row.
//! Every mutating call is counted, and individual writes can be made to fail.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use crate::ledger::{
    DealLedger, DealRecord, KnownManifest, ManifestBatch, ManifestLedger, NewManifest, NewManifestEntry,
    PendingProposal, ProposalLedger, TrackedDeal,
};
use crate::status::DealStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceRecord {
    pub piece_cid: String,
    pub root_cid: Option<String>,
    pub claimed_root_cid: Option<String>,
    pub payload_size: Option<i64>,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProposalRecord {
    pub provider: String,
    pub piece_cid: String,
    pub client: String,
    pub payload: serde_json::Value,
    pub success_cid: Option<String>,
    pub failure_text: String,
    pub active_deal_id: Option<i64>,
    pub start_time: DateTime<Utc>,
}

impl ProposalRecord {
    /// A fresh, unresolved proposal.
    pub fn pending(provider: &str, piece_cid: &str, client: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            provider: provider.to_string(),
            piece_cid: piece_cid.to_string(),
            client: client.to_string(),
            payload: serde_json::json!({ "Miner": provider, "Data": { "PieceCid": { "/": piece_cid } } }),
            success_cid: None,
            failure_text: String::new(),
            active_deal_id: None,
            start_time,
        }
    }

    fn is_unresolved(&self) -> bool {
        self.success_cid.is_none() && self.failure_text.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientRecord {
    pub outstanding_datacap: Option<i64>,
    pub datacap_allowance: Option<String>,
}

/// A write that should fail when attempted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Ingest,
    /// Either outcome write for the proposal with this piece CID.
    ProposalOutcome(String),
    DealUpsert(i64),
    Backlink(i64),
    Sweep,
    Datacap(String),
}

#[derive(Debug, Clone, Default)]
struct Tables {
    manifests: BTreeMap<String, NewManifest>,
    entries: BTreeMap<(String, String), NewManifestEntry>,
    drives: BTreeSet<String>,
    pieces: BTreeMap<String, PieceRecord>,
    providers: BTreeSet<String>,
    clients: BTreeMap<String, ClientRecord>,
    proposals: BTreeMap<(String, String), ProposalRecord>,
    deals: BTreeMap<i64, DealRecord>,
}

impl Tables {
    fn backfill_root_cids(&mut self) -> u64 {
        let confirmed: HashSet<(String, i64)> = self
            .entries
            .values()
            .filter(|e| {
                let flag = |name: &str| e.meta.get(name).and_then(|v| v.as_bool()).unwrap_or(false);
                flag("valid_size") && (flag("valid_header") || flag("valid_commp"))
            })
            .filter_map(|e| {
                e.meta
                    .get("size")
                    .and_then(|v| v.as_i64())
                    .map(|size| (e.claimed_root_cid.clone(), size))
            })
            .collect();

        let mut promoted = 0;
        for piece in self.pieces.values_mut() {
            if piece.root_cid.is_some() {
                continue;
            }
            let (Some(claimed), Some(size)) = (&piece.claimed_root_cid, piece.payload_size) else {
                continue;
            };
            if confirmed.contains(&(claimed.clone(), size)) {
                piece.root_cid = Some(claimed.clone());
                promoted += 1;
            }
        }
        promoted
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    tables: Arc<RwLock<Tables>>,
    failures: Arc<RwLock<HashSet<FailurePoint>>>,
    writes: Arc<AtomicU64>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls made so far, successful or not.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn fail_on(&self, point: FailurePoint) {
        self.failures.write().await.insert(point);
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    async fn attempt(&self, point: FailurePoint) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failures.read().await.contains(&point) {
            return Err(anyhow!("injected failure at {:?}", point));
        }
        Ok(())
    }

    // Seeding, bypasses write counting

    pub async fn insert_piece(&self, piece: PieceRecord) {
        self.tables
            .write()
            .await
            .pieces
            .insert(piece.piece_cid.clone(), piece);
    }

    pub async fn insert_proposal(&self, proposal: ProposalRecord) {
        let key = (proposal.provider.clone(), proposal.piece_cid.clone());
        self.tables.write().await.proposals.insert(key, proposal);
    }

    pub async fn insert_client(&self, address: &str) {
        self.tables
            .write()
            .await
            .clients
            .entry(address.to_string())
            .or_default();
    }

    pub async fn insert_deal(&self, deal: DealRecord) {
        self.tables.write().await.deals.insert(deal.deal_id, deal);
    }

    pub async fn insert_manifest(&self, manifest: NewManifest) {
        self.tables
            .write()
            .await
            .manifests
            .insert(manifest.id.clone(), manifest);
    }

    // Inspection

    pub async fn piece(&self, piece_cid: &str) -> Option<PieceRecord> {
        self.tables.read().await.pieces.get(piece_cid).cloned()
    }

    pub async fn proposal(&self, provider: &str, piece_cid: &str) -> Option<ProposalRecord> {
        self.tables
            .read()
            .await
            .proposals
            .get(&(provider.to_string(), piece_cid.to_string()))
            .cloned()
    }

    pub async fn client(&self, address: &str) -> Option<ClientRecord> {
        self.tables.read().await.clients.get(address).cloned()
    }

    pub async fn deal(&self, deal_id: i64) -> Option<DealRecord> {
        self.tables.read().await.deals.get(&deal_id).cloned()
    }

    pub async fn manifests(&self) -> Vec<NewManifest> {
        self.tables.read().await.manifests.values().cloned().collect()
    }

    pub async fn manifest_entries(&self) -> Vec<NewManifestEntry> {
        self.tables.read().await.entries.values().cloned().collect()
    }

    pub async fn drives(&self) -> Vec<String> {
        self.tables.read().await.drives.iter().cloned().collect()
    }

    pub async fn providers(&self) -> Vec<String> {
        self.tables.read().await.providers.iter().cloned().collect()
    }
}

#[async_trait]
impl ManifestLedger for MemoryLedger {
    async fn known_manifests(&self) -> Result<Vec<KnownManifest>> {
        Ok(self
            .tables
            .read()
            .await
            .manifests
            .values()
            .map(|m| KnownManifest {
                id: m.id.clone(),
                uploaded_at: m.uploaded_at,
            })
            .collect())
    }

    async fn known_drive_serials(&self) -> Result<HashSet<String>> {
        Ok(self.tables.read().await.drives.iter().cloned().collect())
    }

    async fn ingest_manifests(&self, batch: ManifestBatch) -> Result<u64> {
        self.attempt(FailurePoint::Ingest).await?;

        let mut tables = self.tables.write().await;
        // Work on a copy so a constraint violation leaves nothing behind
        let mut staged = tables.clone();

        staged.drives.extend(batch.drives);
        for manifest in batch.manifests {
            if staged.manifests.contains_key(&manifest.id) {
                return Err(anyhow!("duplicate key: manifest {}", manifest.id));
            }
            staged.manifests.insert(manifest.id.clone(), manifest);
        }
        for entry in batch.entries {
            let key = (entry.manifest_id.clone(), entry.claimed_root_cid.clone());
            if staged.entries.contains_key(&key) {
                return Err(anyhow!("duplicate key: manifest entry {:?}", key));
            }
            staged.entries.insert(key, entry);
        }

        let promoted = staged.backfill_root_cids();
        *tables = staged;
        Ok(promoted)
    }
}

#[async_trait]
impl ProposalLedger for MemoryLedger {
    async fn pending_proposals(&self) -> Result<Vec<PendingProposal>> {
        let tables = self.tables.read().await;
        let mut pending: Vec<PendingProposal> = tables
            .proposals
            .values()
            .filter(|p| p.is_unresolved())
            .map(|p| PendingProposal {
                provider: p.provider.clone(),
                piece_cid: p.piece_cid.clone(),
                client: p.client.clone(),
                payload: p.payload.clone(),
                start_time: p.start_time,
            })
            .collect();
        pending.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.piece_cid.cmp(&b.piece_cid))
        });
        Ok(pending)
    }

    async fn record_proposal_success(&self, provider: &str, piece_cid: &str, success_cid: &str) -> Result<bool> {
        self.attempt(FailurePoint::ProposalOutcome(piece_cid.to_string()))
            .await?;
        let mut tables = self.tables.write().await;
        match tables
            .proposals
            .get_mut(&(provider.to_string(), piece_cid.to_string()))
        {
            Some(p) if p.is_unresolved() => {
                p.success_cid = Some(success_cid.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_proposal_failure(&self, provider: &str, piece_cid: &str, failure: &str) -> Result<bool> {
        self.attempt(FailurePoint::ProposalOutcome(piece_cid.to_string()))
            .await?;
        let mut tables = self.tables.write().await;
        match tables
            .proposals
            .get_mut(&(provider.to_string(), piece_cid.to_string()))
        {
            Some(p) if p.is_unresolved() => {
                p.failure_text = failure.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl DealLedger for MemoryLedger {
    async fn eligible_pieces(&self) -> Result<HashSet<String>> {
        Ok(self.tables.read().await.pieces.keys().cloned().collect())
    }

    async fn tracked_deals(&self) -> Result<HashMap<i64, TrackedDeal>> {
        let tables = self.tables.read().await;
        Ok(tables
            .deals
            .values()
            .filter(|d| tables.pieces.contains_key(&d.piece_cid))
            .map(|d| {
                (
                    d.deal_id,
                    TrackedDeal {
                        piece_cid: d.piece_cid.clone(),
                        status: d.status,
                    },
                )
            })
            .collect())
    }

    async fn verified_clients(&self) -> Result<Vec<String>> {
        Ok(self.tables.read().await.clients.keys().cloned().collect())
    }

    async fn known_providers(&self) -> Result<HashSet<String>> {
        Ok(self.tables.read().await.providers.iter().cloned().collect())
    }

    async fn register_provider(&self, address: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.tables
            .write()
            .await
            .providers
            .insert(address.to_string());
        Ok(())
    }

    async fn upsert_deal(&self, deal: &DealRecord) -> Result<Option<DealStatus>> {
        self.attempt(FailurePoint::DealUpsert(deal.deal_id)).await?;
        let mut tables = self.tables.write().await;

        let Some(existing) = tables.deals.get_mut(&deal.deal_id) else {
            tables.deals.insert(deal.deal_id, deal.clone());
            return Ok(None);
        };

        let prior = existing.status;
        if prior.accepts(deal.status) {
            existing.status = deal.status;
            existing.status_detail = deal.status_detail.clone();
        }
        if deal.sector_start_epoch.is_some() {
            existing.sector_start_epoch = deal.sector_start_epoch;
        }
        Ok(Some(prior))
    }

    async fn link_active_deal(&self, deal_id: i64, piece_cid: &str, provider: &str, client: &str) -> Result<bool> {
        self.attempt(FailurePoint::Backlink(deal_id)).await?;
        let mut tables = self.tables.write().await;
        match tables
            .proposals
            .get_mut(&(provider.to_string(), piece_cid.to_string()))
        {
            Some(p)
                if p.client == client
                    && p.failure_text.is_empty()
                    && p.success_cid.is_some()
                    && p.active_deal_id.is_none() =>
            {
                p.active_deal_id = Some(deal_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep_missing_deals(&self, deal_ids: &[i64], detail: &str) -> Result<u64> {
        self.attempt(FailurePoint::Sweep).await?;
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for id in deal_ids {
            if let Some(deal) = tables.deals.get_mut(id) {
                if deal.status != DealStatus::Terminated {
                    deal.status = DealStatus::Terminated;
                    deal.status_detail = Some(detail.to_string());
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn update_client_datacap(&self, address: &str, outstanding: i64, allowance: Option<String>) -> Result<()> {
        self.attempt(FailurePoint::Datacap(address.to_string()))
            .await?;
        if let Some(client) = self.tables.write().await.clients.get_mut(address) {
            client.outstanding_datacap = Some(outstanding.max(0));
            client.datacap_allowance = allowance;
        }
        Ok(())
    }
}
