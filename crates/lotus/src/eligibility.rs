use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::ChainApi;
use crate::cache::TtlCache;
use crate::constants::{ELIGIBILITY_CACHE_CAPACITY, ELIGIBILITY_CACHE_TTL_SECS, EPOCHS_IN_DAY};
use crate::error::Result;
use crate::lookback::ChainLookbackResolver;
use crate::types::{ChainEpoch, TipSetKey};

pub const MBI_INELIGIBLE: &str = "MBI-ineligible";

/// Decides whether a storage provider may currently receive deals.
///
/// A provider is ineligible when the node reports no mining base info for it,
/// or when it carried faults at the lookback tipset or one day before it.
/// Verdicts are kept for five minutes; failed lookups are never cached.
pub struct ProviderEligibility {
    api: Arc<dyn ChainApi>,
    resolver: ChainLookbackResolver,
    cache: TtlCache<String, Option<String>>,
    ttl: Duration,
}

impl ProviderEligibility {
    pub fn new(api: Arc<dyn ChainApi>, resolver: ChainLookbackResolver) -> Self {
        Self {
            api,
            resolver,
            cache: TtlCache::new(ELIGIBILITY_CACHE_CAPACITY),
            ttl: Duration::from_secs(ELIGIBILITY_CACHE_TTL_SECS),
        }
    }

    /// `None` when eligible, otherwise a short human-readable reason.
    pub async fn ineligible_reason(&self, provider: &str) -> Result<Option<String>> {
        if let Some(verdict) = self.cache.get(&provider.to_string()) {
            debug!("Eligibility cache hit for {}", provider);
            return Ok(verdict);
        }

        match self.evaluate(provider).await {
            Ok(verdict) => {
                self.cache.insert(provider.to_string(), verdict.clone(), self.ttl);
                Ok(verdict)
            }
            Err(e) => {
                warn!("Eligibility check for {} failed: {}", provider, e);
                self.cache.remove(&provider.to_string());
                Err(e)
            }
        }
    }

    async fn evaluate(&self, provider: &str) -> Result<Option<String>> {
        let lookback = self.resolver.resolve().await?;

        let base_info = self
            .api
            .miner_get_base_info(provider, lookback.height, &lookback.key)
            .await?;
        if !base_info.is_some_and(|mbi| mbi.eligible_for_mining) {
            return Ok(Some(MBI_INELIGIBLE.to_string()));
        }

        if let Some(reason) = self.faults_at(provider, lookback.height, &lookback.key).await? {
            return Ok(Some(reason));
        }

        let day_ago = lookback.height - EPOCHS_IN_DAY + 1;
        let earlier = self
            .api
            .chain_get_tipset_by_height(day_ago, &lookback.key)
            .await?;
        self.faults_at(provider, earlier.height, &earlier.key()).await
    }

    async fn faults_at(&self, provider: &str, height: ChainEpoch, tsk: &TipSetKey) -> Result<Option<String>> {
        let faults = self.api.state_miner_faults(provider, tsk).await?.count();
        if faults > 0 {
            return Ok(Some(format!("{} faults at epoch {}", faults, height)));
        }
        Ok(None)
    }
}
