//! Mainnet chain parameters used by the lookback and classification logic.

/// Unix time of the mainnet genesis block.
pub const GENESIS_UNIX: i64 = 1_598_306_400;

/// Duration of one epoch in seconds.
pub const EPOCH_DURATION_SECS: i64 = 30;

/// Block propagation delay in seconds.
pub const PROPAGATION_DELAY_SECS: i64 = 10;

/// Number of epochs in a day.
pub const EPOCHS_IN_DAY: i64 = 2880;

/// Default number of epochs to stay behind the chain head.
pub const DEFAULT_LOOKBACK_EPOCHS: i64 = 10;

/// WindowPoSt challenge window in epochs. A deal whose sector has not started
/// this long after its proposed start epoch is considered missed.
pub const WPOST_CHALLENGE_WINDOW: i64 = 60;

/// How far wall time may run ahead of the head timestamp: the propagation delay
/// plus two back-to-back null rounds. A third null round is implausible.
pub const HEAD_TIMESTAMP_TOLERANCE_SECS: i64 = PROPAGATION_DELAY_SECS + 2 * EPOCH_DURATION_SECS;

/// Per-request timeout for the JSON-RPC transport. Market state snapshots are large.
pub const RPC_REQUEST_TIMEOUT_SECS: u64 = 600;

/// How long a provider eligibility verdict is reused.
pub const ELIGIBILITY_CACHE_TTL_SECS: u64 = 300;

/// Maximum number of cached eligibility verdicts.
pub const ELIGIBILITY_CACHE_CAPACITY: usize = 1024;
