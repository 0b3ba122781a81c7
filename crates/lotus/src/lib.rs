pub mod api;
pub mod cache;
pub mod client;
pub mod constants;
pub mod eligibility;
pub mod epoch;
pub mod error;
pub mod lookback;
pub mod types;

pub use api::{ChainApi, DealApi};
pub use cache::TtlCache;
pub use client::LotusClient;
pub use eligibility::{MBI_INELIGIBLE, ProviderEligibility};
pub use epoch::{epoch_at, mainnet_time, wall_time_epoch};
pub use error::{LotusError, Result};
pub use lookback::{ChainLookbackResolver, check_head_freshness};
pub use types::{
    BitFieldRuns, BlockHeader, ChainEpoch, CidLink, DealProposal, DealState, MarketDeal, MiningBaseInfo, TipSet,
    TipSetKey, TipsetRef,
};
