use serde::{Deserialize, Serialize};
use std::fmt;

pub type ChainEpoch = i64;

/// A CID in the node's JSON encoding: `{"/": "bafy..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CidLink {
    #[serde(rename = "/")]
    pub root: String,
}

impl CidLink {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }
}

impl fmt::Display for CidLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)
    }
}

/// Key of a tipset: the CIDs of its blocks. An empty key means "heaviest tipset".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TipSetKey(pub Vec<CidLink>);

impl TipSetKey {
    pub fn empty() -> Self {
        Self(Vec::new())
    }
}

impl fmt::Display for TipSetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cids: Vec<&str> = self.0.iter().map(|c| c.root.as_str()).collect();
        write!(f, "{{{}}}", cids.join(","))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockHeader {
    #[serde(default)]
    pub miner: String,
    pub height: ChainEpoch,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TipSet {
    pub cids: Vec<CidLink>,
    pub blocks: Vec<BlockHeader>,
    pub height: ChainEpoch,
}

impl TipSet {
    pub fn key(&self) -> TipSetKey {
        TipSetKey(self.cids.clone())
    }

    /// All blocks of a tipset share one timestamp.
    pub fn timestamp(&self) -> Option<i64> {
        self.blocks.first().map(|b| b.timestamp as i64)
    }
}

/// A resolved chain reference point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipsetRef {
    pub key: TipSetKey,
    pub height: ChainEpoch,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MarketDeal {
    pub proposal: DealProposal,
    pub state: DealState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DealProposal {
    #[serde(rename = "PieceCID")]
    pub piece_cid: CidLink,
    pub piece_size: u64,
    pub verified_deal: bool,
    pub client: String,
    pub provider: String,
    #[serde(default)]
    pub label: serde_json::Value,
    pub start_epoch: ChainEpoch,
    pub end_epoch: ChainEpoch,
}

impl DealProposal {
    /// The label as text, when the node reports one.
    pub fn label_text(&self) -> Option<String> {
        match &self.label {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DealState {
    pub sector_start_epoch: ChainEpoch,
    #[serde(default)]
    pub last_updated_epoch: ChainEpoch,
    #[serde(default)]
    pub slash_epoch: ChainEpoch,
}

/// Subset of `MinerGetBaseInfo` the eligibility check needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MiningBaseInfo {
    #[serde(default)]
    pub eligible_for_mining: bool,
}

/// A bitfield in its JSON form: run lengths alternating unset/set, starting unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct BitFieldRuns(pub Vec<u64>);

impl BitFieldRuns {
    /// Number of set bits.
    pub fn count(&self) -> u64 {
        self.0.iter().skip(1).step_by(2).sum()
    }
}
