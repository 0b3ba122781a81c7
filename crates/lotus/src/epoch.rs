use chrono::{DateTime, Utc};

use crate::constants::{EPOCH_DURATION_SECS, GENESIS_UNIX};
use crate::types::ChainEpoch;

/// Wall-clock time of a mainnet epoch.
pub fn mainnet_time(epoch: ChainEpoch) -> DateTime<Utc> {
    DateTime::from_timestamp(epoch * EPOCH_DURATION_SECS + GENESIS_UNIX, 0)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The epoch a given unix time falls into.
pub fn epoch_at(unix: i64) -> ChainEpoch {
    (unix - GENESIS_UNIX) / EPOCH_DURATION_SECS
}

/// The epoch the wall clock currently falls into.
pub fn wall_time_epoch() -> ChainEpoch {
    epoch_at(Utc::now().timestamp())
}
