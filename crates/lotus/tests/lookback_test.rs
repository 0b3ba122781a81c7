use async_trait::async_trait;
use lotus::constants::{EPOCHS_IN_DAY, HEAD_TIMESTAMP_TOLERANCE_SECS};
use lotus::{
    BitFieldRuns, BlockHeader, ChainApi, ChainEpoch, ChainLookbackResolver, CidLink, LotusError, MarketDeal,
    MiningBaseInfo, ProviderEligibility, Result, TipSet, TipSetKey, mainnet_time, wall_time_epoch,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Scripted node: a linear chain up to `head_height`, optionally with null rounds.
struct FakeChain {
    head_height: ChainEpoch,
    null_rounds: HashSet<ChainEpoch>,
    faults: HashMap<ChainEpoch, Vec<u64>>,
    mining_eligible: Option<bool>,
    fail_faults: bool,
    tipset_requests: Mutex<Vec<(ChainEpoch, TipSetKey)>>,
    base_info_calls: AtomicUsize,
}

impl FakeChain {
    fn new(head_height: ChainEpoch) -> Self {
        Self {
            head_height,
            null_rounds: HashSet::new(),
            faults: HashMap::new(),
            mining_eligible: Some(true),
            fail_faults: false,
            tipset_requests: Mutex::new(Vec::new()),
            base_info_calls: AtomicUsize::new(0),
        }
    }

    fn tipset(height: ChainEpoch) -> TipSet {
        TipSet {
            cids: vec![CidLink::new(format!("bafyblock{}", height))],
            blocks: vec![BlockHeader {
                miner: "f01000".to_string(),
                height,
                timestamp: mainnet_time(height).timestamp() as u64,
            }],
            height,
        }
    }

    fn head_unix(&self) -> i64 {
        mainnet_time(self.head_height).timestamp()
    }

    fn height_of(key: &TipSetKey) -> ChainEpoch {
        key.0
            .first()
            .and_then(|c| c.root.strip_prefix("bafyblock"))
            .and_then(|h| h.parse().ok())
            .unwrap_or(-1)
    }
}

#[async_trait]
impl ChainApi for FakeChain {
    async fn chain_head(&self) -> Result<TipSet> {
        Ok(Self::tipset(self.head_height))
    }

    async fn chain_get_tipset_by_height(&self, height: ChainEpoch, anchor: &TipSetKey) -> Result<TipSet> {
        self.tipset_requests.lock().push((height, anchor.clone()));
        let mut h = height;
        while self.null_rounds.contains(&h) {
            h -= 1;
        }
        Ok(Self::tipset(h))
    }

    async fn state_market_deals(&self, _tsk: &TipSetKey) -> Result<HashMap<String, MarketDeal>> {
        Ok(HashMap::new())
    }

    async fn state_account_key(&self, address: &str, _tsk: &TipSetKey) -> Result<String> {
        Ok(address.to_string())
    }

    async fn state_verified_client_status(&self, _address: &str, _tsk: &TipSetKey) -> Result<Option<String>> {
        Ok(None)
    }

    async fn miner_get_base_info(
        &self,
        _provider: &str,
        _epoch: ChainEpoch,
        _tsk: &TipSetKey,
    ) -> Result<Option<MiningBaseInfo>> {
        self.base_info_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .mining_eligible
            .map(|eligible_for_mining| MiningBaseInfo { eligible_for_mining }))
    }

    async fn state_miner_faults(&self, _provider: &str, tsk: &TipSetKey) -> Result<BitFieldRuns> {
        if self.fail_faults {
            return Err(LotusError::RpcConnectionError("connection reset".to_string()));
        }
        let height = Self::height_of(tsk);
        Ok(BitFieldRuns(self.faults.get(&height).cloned().unwrap_or_default()))
    }
}

#[tokio::test]
async fn test_resolves_height_behind_head() {
    let chain = Arc::new(FakeChain::new(4_000_000));
    let resolver = ChainLookbackResolver::new(chain.clone(), 10);

    let tipset = resolver.resolve_at(chain.head_unix() + 15).await.unwrap();
    assert_eq!(tipset.height, 4_000_000 - 10);
    assert_eq!(tipset.timestamp, mainnet_time(4_000_000 - 10).timestamp());
    assert_eq!(tipset.key, FakeChain::tipset(4_000_000 - 10).key());

    // the walk-back is anchored at the head the freshness check accepted
    let requests = chain.tipset_requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].1, FakeChain::tipset(4_000_000).key());
}

#[tokio::test]
async fn test_desync_when_head_is_stale() {
    let chain = Arc::new(FakeChain::new(4_000_000));
    let resolver = ChainLookbackResolver::new(chain.clone(), 10);

    let err = resolver
        .resolve_at(chain.head_unix() + HEAD_TIMESTAMP_TOLERANCE_SECS + 1)
        .await
        .unwrap_err();
    assert!(matches!(err, LotusError::ChainDesynced { height: 4_000_000, .. }));
    assert!(chain.tipset_requests.lock().is_empty());

    // exactly at the tolerance is still accepted
    assert!(
        resolver
            .resolve_at(chain.head_unix() + HEAD_TIMESTAMP_TOLERANCE_SECS)
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_desync_when_head_is_in_the_future() {
    let chain = Arc::new(FakeChain::new(4_000_000));
    let resolver = ChainLookbackResolver::new(chain.clone(), 10);

    let err = resolver.resolve_at(chain.head_unix() - 1).await.unwrap_err();
    assert!(matches!(err, LotusError::ChainDesynced { .. }));
    assert!(err.to_string().contains("delta: -1s"));
}

#[tokio::test]
async fn test_null_round_reports_actual_height() {
    let mut chain = FakeChain::new(4_000_000);
    chain.null_rounds.insert(4_000_000 - 10);
    let chain = Arc::new(chain);
    let resolver = ChainLookbackResolver::new(chain.clone(), 10);

    let tipset = resolver.resolve_at(chain.head_unix()).await.unwrap();
    assert_eq!(tipset.height, 4_000_000 - 11);
}

// Eligibility resolves against the real clock, so these chains end at the current epoch.
#[tokio::test]
async fn test_eligibility_verdicts() {
    let head = wall_time_epoch();
    let lookback = head - 10;

    let mut chain = FakeChain::new(head);
    chain.mining_eligible = None;
    let chain = Arc::new(chain);
    let eligibility = ProviderEligibility::new(chain.clone(), ChainLookbackResolver::new(chain.clone(), 10));
    assert_eq!(
        eligibility.ineligible_reason("f01234").await.unwrap().as_deref(),
        Some("MBI-ineligible")
    );

    let mut chain = FakeChain::new(head);
    chain.faults.insert(lookback - EPOCHS_IN_DAY + 1, vec![5, 2, 10, 1]);
    let chain = Arc::new(chain);
    let eligibility = ProviderEligibility::new(chain.clone(), ChainLookbackResolver::new(chain.clone(), 10));
    assert_eq!(
        eligibility.ineligible_reason("f01234").await.unwrap(),
        Some(format!("3 faults at epoch {}", lookback - EPOCHS_IN_DAY + 1))
    );

    let chain = Arc::new(FakeChain::new(head));
    let eligibility = ProviderEligibility::new(chain.clone(), ChainLookbackResolver::new(chain.clone(), 10));
    assert_eq!(eligibility.ineligible_reason("f01234").await.unwrap(), None);
}

#[tokio::test]
async fn test_eligibility_is_cached_but_errors_are_not() {
    let chain = Arc::new(FakeChain::new(wall_time_epoch()));
    let eligibility = ProviderEligibility::new(chain.clone(), ChainLookbackResolver::new(chain.clone(), 10));

    assert_eq!(eligibility.ineligible_reason("f01234").await.unwrap(), None);
    assert_eq!(eligibility.ineligible_reason("f01234").await.unwrap(), None);
    assert_eq!(chain.base_info_calls.load(Ordering::SeqCst), 1);

    let mut failing = FakeChain::new(wall_time_epoch());
    failing.fail_faults = true;
    let failing = Arc::new(failing);
    let eligibility = ProviderEligibility::new(failing.clone(), ChainLookbackResolver::new(failing.clone(), 10));

    assert!(eligibility.ineligible_reason("f05678").await.is_err());
    assert!(eligibility.ineligible_reason("f05678").await.is_err());
    assert_eq!(failing.base_info_calls.load(Ordering::SeqCst), 2);
}
