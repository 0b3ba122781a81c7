//! Reconciliation of on-chain market deals with the ledger.
//!
//! Two gathering paths run side by side: the chain path resolves the lookback
//! tipset and downloads the market deal table, the ledger path loads eligible
//! pieces, tracked deals, providers and clients, then reads the clients' datacap
//! at the tipset the chain path hands over. Reconciliation starts once both are
//! complete.

use db::{DealLedger, DealRecord, DealStatus, TrackedDeal};
use lotus::constants::WPOST_CHALLENGE_WINDOW;
use lotus::{ChainApi, ChainEpoch, ChainLookbackResolver, MarketDeal, TipsetRef, mainnet_time};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DealerError, Result};

pub const MISSING_FROM_MARKET_DETAIL: &str = "deal no longer part of market state";

/// Status of a chain-observed deal at the lookback height.
///
/// A sector start past zero means the deal is active. Otherwise a deal whose
/// proposed start plus the fault window has been reached without sealing is
/// presumed missed and terminated. Anything else is still published.
pub fn classify_deal(
    sector_start_epoch: ChainEpoch,
    proposal_start_epoch: ChainEpoch,
    fault_window: ChainEpoch,
    lookback_height: ChainEpoch,
) -> (DealStatus, Option<String>) {
    if sector_start_epoch > 0 {
        (
            DealStatus::Active,
            Some(format!(
                "containing sector active as of {} at epoch {}",
                mainnet_time(sector_start_epoch).format("%Y-%m-%d %H:%M:%S"),
                sector_start_epoch
            )),
        )
    } else if proposal_start_epoch + fault_window <= lookback_height {
        (
            DealStatus::Terminated,
            Some(format!(
                "containing sector missed expected sealing epoch {}",
                proposal_start_epoch
            )),
        )
    } else {
        (DealStatus::Published, None)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackSummary {
    pub lookback_height: ChainEpoch,
    pub known_pieces: usize,
    /// Deals for eligible pieces per status after this run, including swept ones.
    pub related_deals: BTreeMap<DealStatus, u64>,
    pub total_providers: usize,
    pub newly_added: u64,
    pub newly_terminated: u64,
    pub backlinks: u64,
    /// Per-record writes that failed and were skipped.
    pub write_failures: u64,
}

struct ChainView {
    tipset: TipsetRef,
    deals: HashMap<String, MarketDeal>,
}

struct LedgerView {
    pieces: HashSet<String>,
    tracked: HashMap<i64, TrackedDeal>,
    providers: HashSet<String>,
    /// Verified clients and their remaining allowance at the lookback tipset.
    clients: BTreeMap<String, Option<String>>,
}

pub struct DealLifecycleTracker {
    chain: Arc<dyn ChainApi>,
    resolver: ChainLookbackResolver,
    ledger: Arc<dyn DealLedger>,
    fault_window: ChainEpoch,
}

impl DealLifecycleTracker {
    pub fn new(chain: Arc<dyn ChainApi>, resolver: ChainLookbackResolver, ledger: Arc<dyn DealLedger>) -> Self {
        Self {
            chain,
            resolver,
            ledger,
            fault_window: WPOST_CHALLENGE_WINDOW,
        }
    }

    pub async fn reconcile(&self, token: &CancellationToken) -> Result<TrackSummary> {
        let mut summary = TrackSummary::default();
        let result = self.run(token, &mut summary).await;

        let related: Vec<String> = summary
            .related_deals
            .iter()
            .map(|(status, n)| format!("{}:{}", status, n))
            .collect();
        info!(
            "summary: lookback_height={} known_pieces={} related_deals={{{}}} total_providers={} newly_added={} newly_terminated={} backlinks={} write_failures={}",
            summary.lookback_height,
            summary.known_pieces,
            related.join(","),
            summary.total_providers,
            summary.newly_added,
            summary.newly_terminated,
            summary.backlinks,
            summary.write_failures
        );
        result.map(|()| summary)
    }

    async fn run(&self, token: &CancellationToken, summary: &mut TrackSummary) -> Result<()> {
        let (tipset_tx, tipset_rx) = oneshot::channel();
        let gathered = token
            .run_until_cancelled(async {
                tokio::try_join!(self.gather_chain(tipset_tx), self.gather_ledger(tipset_rx))
            })
            .await
            .ok_or(DealerError::Cancelled)?;
        let (chain, mut local) = gathered?;

        summary.lookback_height = chain.tipset.height;
        summary.known_pieces = local.pieces.len();
        info!(
            "Checking {} market deals against {} known piece CIDs",
            chain.deals.len(),
            local.pieces.len()
        );

        let mut deals: Vec<(i64, MarketDeal)> = Vec::with_capacity(chain.deals.len());
        for (id, deal) in chain.deals {
            if !local.pieces.contains(&deal.proposal.piece_cid.root) {
                continue;
            }
            let deal_id = id
                .parse::<i64>()
                .map_err(|e| anyhow::anyhow!("market state lists malformed deal id '{}': {}", id, e))?;
            deals.push((deal_id, deal));
        }
        deals.sort_by_key(|(id, _)| *id);

        let mut account_keys: HashMap<String, String> = HashMap::new();
        // Outstanding datacap per robust client address
        let mut outstanding: HashMap<String, i64> = HashMap::new();

        for (deal_id, deal) in deals {
            if token.is_cancelled() {
                return Err(DealerError::Cancelled);
            }
            let proposal = &deal.proposal;
            let known_status = local.tracked.remove(&deal_id).map(|t| t.status);

            if !local.providers.contains(&proposal.provider) {
                match self.ledger.register_provider(&proposal.provider).await {
                    Ok(()) => {
                        debug!("Registered new provider {}", proposal.provider);
                        local.providers.insert(proposal.provider.clone());
                    }
                    Err(e) => {
                        summary.write_failures += 1;
                        warn!("Registering provider {} failed: {}", proposal.provider, e);
                    }
                }
            }

            let client = match account_keys.get(&proposal.client) {
                Some(robust) => robust.clone(),
                None => {
                    let robust = self
                        .chain
                        .state_account_key(&proposal.client, &chain.tipset.key)
                        .await?;
                    account_keys.insert(proposal.client.clone(), robust.clone());
                    robust
                }
            };

            let (observed, detail) = classify_deal(
                deal.state.sector_start_epoch,
                proposal.start_epoch,
                self.fault_window,
                chain.tipset.height,
            );
            let record = DealRecord {
                deal_id,
                piece_cid: proposal.piece_cid.root.clone(),
                label: proposal.label_text(),
                provider: proposal.provider.clone(),
                client: client.clone(),
                verified: proposal.verified_deal,
                start_epoch: proposal.start_epoch,
                end_epoch: proposal.end_epoch,
                status: observed,
                status_detail: detail,
                sector_start_epoch: (deal.state.sector_start_epoch > 0).then_some(deal.state.sector_start_epoch),
            };

            // Outstanding datacap follows the snapshot even when this deal's row cannot be written
            let expected = known_status.map_or(observed, |p| p.advance(observed));
            if proposal.verified_deal && expected == DealStatus::Published {
                *outstanding.entry(client.clone()).or_default() += proposal.piece_size as i64;
            }

            let (prior, status) = match self.ledger.upsert_deal(&record).await {
                Ok(prior) => (prior, prior.map_or(observed, |p| p.advance(observed))),
                Err(e) => {
                    summary.write_failures += 1;
                    warn!("Upserting deal {} failed: {}", deal_id, e);
                    *summary.related_deals.entry(expected).or_default() += 1;
                    continue;
                }
            };

            *summary.related_deals.entry(status).or_default() += 1;
            match (prior, status) {
                (None, DealStatus::Terminated) => summary.newly_terminated += 1,
                (None, _) => summary.newly_added += 1,
                (Some(p), DealStatus::Terminated) if p != DealStatus::Terminated => summary.newly_terminated += 1,
                _ => {}
            }

            if proposal.verified_deal && status == DealStatus::Active && prior != Some(DealStatus::Active) {
                match self
                    .ledger
                    .link_active_deal(deal_id, &record.piece_cid, &record.provider, &client)
                    .await
                {
                    Ok(true) => {
                        summary.backlinks += 1;
                        info!("Deal {} activated, linked to its proposal", deal_id);
                    }
                    Ok(false) => debug!("Deal {} activated without an unlinked successful proposal", deal_id),
                    Err(e) => {
                        summary.write_failures += 1;
                        warn!("Linking active deal {} failed: {}", deal_id, e);
                    }
                }
            }
        }
        summary.total_providers = local.providers.len();

        let mut missing: Vec<i64> = Vec::new();
        for (deal_id, tracked) in &local.tracked {
            *summary.related_deals.entry(DealStatus::Terminated).or_default() += 1;
            if tracked.status != DealStatus::Terminated {
                missing.push(*deal_id);
            }
        }
        if !missing.is_empty() {
            missing.sort_unstable();
            let swept = self
                .ledger
                .sweep_missing_deals(&missing, MISSING_FROM_MARKET_DETAIL)
                .await?;
            info!("Swept {} deals no longer in the market state", swept);
            summary.newly_terminated += swept;
        }

        for (client, allowance) in local.clients {
            let pending = outstanding.get(&client).copied().unwrap_or(0);
            if let Err(e) = self
                .ledger
                .update_client_datacap(&client, pending, allowance)
                .await
            {
                summary.write_failures += 1;
                warn!("Updating datacap of client {} failed: {}", client, e);
            }
        }

        Ok(())
    }

    async fn gather_chain(&self, tipset_tx: oneshot::Sender<TipsetRef>) -> Result<ChainView> {
        let tipset = self.resolver.resolve().await?;
        // The ledger path may already be gone after its own failure
        let _ = tipset_tx.send(tipset.clone());

        info!(
            "Retrieving market deals at {} epoch {} (unix time {})",
            tipset.key, tipset.height, tipset.timestamp
        );
        let deals = self.chain.state_market_deals(&tipset.key).await?;
        info!("Retrieved {} market deal records", deals.len());

        Ok(ChainView { tipset, deals })
    }

    async fn gather_ledger(&self, tipset_rx: oneshot::Receiver<TipsetRef>) -> Result<LedgerView> {
        let pieces = self.ledger.eligible_pieces().await?;
        let tracked = self.ledger.tracked_deals().await?;
        let providers = self.ledger.known_providers().await?;
        let verified = self.ledger.verified_clients().await?;

        let tipset = tipset_rx
            .await
            .map_err(|_| anyhow::anyhow!("lookback tipset was not resolved"))?;

        let mut clients = BTreeMap::new();
        for client in verified {
            let allowance = self
                .chain
                .state_verified_client_status(&client, &tipset.key)
                .await?;
            clients.insert(client, allowance);
        }
        debug!("Queried datacap for {} clients", clients.len());

        Ok(LedgerView {
            pieces,
            tracked,
            providers,
            clients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(classify_deal(0, 100, 20, 121).0, DealStatus::Terminated);
        assert_eq!(classify_deal(0, 100, 20, 120).0, DealStatus::Terminated);
        assert_eq!(classify_deal(0, 100, 20, 119), (DealStatus::Published, None));
        assert_eq!(classify_deal(-1, 100, 20, 119).0, DealStatus::Published);

        for (start, window, height) in [(100, 20, 121), (100, 20, 119), (5_000_000, 60, 0)] {
            assert_eq!(classify_deal(2880, start, window, height).0, DealStatus::Active);
        }
    }

    #[test]
    fn test_classification_details() {
        let (_, detail) = classify_deal(2880, 0, 60, 0);
        assert_eq!(
            detail.as_deref(),
            Some("containing sector active as of 2020-08-25 22:00:00 at epoch 2880")
        );

        let (_, detail) = classify_deal(0, 100, 60, 1000);
        assert_eq!(
            detail.as_deref(),
            Some("containing sector missed expected sealing epoch 100")
        );
    }
}
