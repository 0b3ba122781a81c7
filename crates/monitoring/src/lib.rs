//! # Dealer monitoring
//!
//! Logging initialisation shared by the binaries, and the push of per-run
//! metrics to a Prometheus push gateway.
//!
//! ## Pushed metrics
//!
//! For a stage `<stage>` the prefix is `discover_dealer_cron_<stage>` with every
//! run of non-alphanumeric characters replaced by `_`:
//! - `<prefix>_run_time` - How long the run took, in milliseconds
//! - `<prefix>_success` - 1 when the run succeeded, 0 otherwise

pub mod logging;
pub mod push;

pub use logging::init_logging;
pub use push::{PushConfig, PushGateway, encode_run_metrics, metric_prefix};
