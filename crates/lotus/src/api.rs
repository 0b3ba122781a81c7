//! The node surface consumed by the pipeline.
//!
//! Components hold these as trait objects so the process entrypoint owns the
//! concrete client and tests can substitute scripted nodes.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::types::{BitFieldRuns, ChainEpoch, CidLink, MarketDeal, MiningBaseInfo, TipSet, TipSetKey};

/// Read-only chain state queries.
#[async_trait]
pub trait ChainApi: Send + Sync {
    async fn chain_head(&self) -> Result<TipSet>;

    /// Tipset at `height` on the chain ending in `anchor`. Null rounds resolve to
    /// the nearest earlier tipset.
    async fn chain_get_tipset_by_height(&self, height: ChainEpoch, anchor: &TipSetKey) -> Result<TipSet>;

    /// Complete market actor deal table, keyed by decimal deal id.
    async fn state_market_deals(&self, tsk: &TipSetKey) -> Result<HashMap<String, MarketDeal>>;

    /// Resolve an ID address to its robust account key.
    async fn state_account_key(&self, address: &str, tsk: &TipSetKey) -> Result<String>;

    /// Remaining datacap of a verified client, `None` when the address holds none.
    async fn state_verified_client_status(&self, address: &str, tsk: &TipSetKey) -> Result<Option<String>>;

    async fn miner_get_base_info(
        &self,
        provider: &str,
        epoch: ChainEpoch,
        tsk: &TipSetKey,
    ) -> Result<Option<MiningBaseInfo>>;

    async fn state_miner_faults(&self, provider: &str, tsk: &TipSetKey) -> Result<BitFieldRuns>;
}

/// Deal submission.
#[async_trait]
pub trait DealApi: Send + Sync {
    /// Submit a prepared deal-start payload to its provider, returning the proposal CID.
    async fn client_stateless_deal(&self, params: &serde_json::Value) -> Result<CidLink>;
}
