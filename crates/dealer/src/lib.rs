//! Reconciliation pipeline keeping the deal ledger in step with the manifest
//! bucket and the Filecoin chain.
//!
//! Each stage is an independent, externally scheduled run:
//!
//! - [`ManifestIngestor`]: new validation manifests from the bucket
//! - [`DealProposalDispatcher`]: unresolved proposals out to their providers
//! - [`DealLifecycleTracker`]: on-chain market deals back into the ledger
//!
//! Stages share no state beyond the ledger. The `dealer-cron` binary wraps each
//! in a per-stage lock, run logging and a metrics push.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod lock;
pub mod manifest;
pub mod runner;
pub mod stage;
pub mod track;

pub use config::{DealerConfig, FileConfig, PushSettings};
pub use dispatch::{DealProposalDispatcher, DispatchSummary, group_by_provider};
pub use error::{DealerError, Result};
pub use ingest::{IngestStats, ManifestIngestor};
pub use lock::StageLock;
pub use manifest::{DriveSerialPattern, EntrySummary, ManifestDocument};
pub use stage::Stage;
pub use track::{DealLifecycleTracker, MISSING_FROM_MARKET_DETAIL, TrackSummary, classify_deal};
