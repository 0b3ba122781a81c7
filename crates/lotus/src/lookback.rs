//! Reorg-safe chain reference point.
//!
//! Reading state at the head risks acting on a branch that is reorganized away
//! seconds later, so every reader works from a tipset a fixed number of epochs
//! behind it.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::ChainApi;
use crate::constants::HEAD_TIMESTAMP_TOLERANCE_SECS;
use crate::error::{LotusError, Result};
use crate::types::{ChainEpoch, TipsetRef};

#[derive(Clone)]
pub struct ChainLookbackResolver {
    api: Arc<dyn ChainApi>,
    lookback_epochs: ChainEpoch,
}

impl ChainLookbackResolver {
    pub fn new(api: Arc<dyn ChainApi>, lookback_epochs: ChainEpoch) -> Self {
        Self {
            api,
            lookback_epochs,
        }
    }

    pub async fn resolve(&self) -> Result<TipsetRef> {
        self.resolve_at(Utc::now().timestamp()).await
    }

    /// Resolve against an explicit wall-clock reading.
    pub async fn resolve_at(&self, wall_unix: i64) -> Result<TipsetRef> {
        let head = self.api.chain_head().await?;
        let chain_unix = head
            .timestamp()
            .ok_or_else(|| LotusError::ParseError("chain head contains no blocks".to_string()))?;

        check_head_freshness(chain_unix, head.height, wall_unix)?;

        let target = head.height - self.lookback_epochs;
        debug!(
            "Chain head at height {} ({}s behind wall time), resolving lookback height {}",
            head.height,
            wall_unix - chain_unix,
            target
        );

        let tipset = self
            .api
            .chain_get_tipset_by_height(target, &head.key())
            .await
            .map_err(|e| {
                LotusError::Other(anyhow::anyhow!(
                    "determining target tipset {} epochs ago failed: {}",
                    self.lookback_epochs,
                    e
                ))
            })?;

        let timestamp = tipset
            .timestamp()
            .ok_or_else(|| LotusError::ParseError(format!("tipset at height {} contains no blocks", tipset.height)))?;

        info!(
            "Resolved lookback tipset {} at epoch {} (head {})",
            tipset.key(),
            tipset.height,
            head.height
        );

        Ok(TipsetRef {
            key: tipset.key(),
            height: tipset.height,
            timestamp,
        })
    }
}

/// Fails when the head timestamp is in the future, or further in the past than the
/// propagation delay plus two null rounds.
pub fn check_head_freshness(chain_unix: i64, height: ChainEpoch, wall_unix: i64) -> Result<()> {
    if wall_unix < chain_unix || wall_unix > chain_unix + HEAD_TIMESTAMP_TOLERANCE_SECS {
        return Err(LotusError::ChainDesynced {
            chain_unix,
            height,
            wall_unix,
        });
    }
    Ok(())
}
