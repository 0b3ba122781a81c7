use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DealerError {
    #[error(
        "unexpected stored timestamp {stored} of manifest '{id}' does not match bucket timestamp {remote}; refusing to reconcile"
    )]
    ManifestClockMismatch {
        id: String,
        stored: DateTime<Utc>,
        remote: DateTime<Utc>,
    },

    #[error("decoding manifest '{id}' failed: {reason}")]
    ManifestDecode { id: String, reason: String },

    #[error("another '{stage}' run holds the lock at {}", .path.display())]
    StageLocked { stage: String, path: PathBuf },

    #[error("run cancelled")]
    Cancelled,

    #[error("panic encountered: {0}")]
    Panic(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Chain(#[from] lotus::LotusError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DealerError>;
