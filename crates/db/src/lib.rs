pub mod database;
pub mod entity;
pub mod ledger;
pub mod memory;
pub mod status;

pub use database::Database;
pub use ledger::{
    DealLedger, DealRecord, KnownManifest, ManifestBatch, ManifestLedger, NewManifest, NewManifestEntry,
    PendingProposal, ProposalLedger, TrackedDeal,
};
pub use memory::{ClientRecord, FailurePoint, MemoryLedger, PieceRecord, ProposalRecord};
pub use status::DealStatus;
