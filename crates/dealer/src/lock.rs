//! Single-instance exclusion per stage via an advisory file lock.
//!
//! The lock lives as long as the returned guard; the OS releases it when the
//! process exits, so a crashed run never leaves a stale lock behind.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{DealerError, Result};
use crate::stage::Stage;

pub const LOCK_FILE_PREFIX: &str = "ddcron-";

#[derive(Debug)]
pub struct StageLock {
    file: File,
    path: PathBuf,
}

impl StageLock {
    pub fn lock_path(dir: &Path, stage: Stage) -> PathBuf {
        dir.join(format!("{}{}", LOCK_FILE_PREFIX, stage.name()))
    }

    /// Fails with `StageLocked` when another process holds the stage lock.
    pub fn acquire(dir: &Path, stage: Stage) -> Result<Self> {
        let path = Self::lock_path(dir, stage);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| anyhow::anyhow!("opening lock file {} failed: {}", path.display(), e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired stage lock {}", path.display());
                Ok(Self { file, path })
            }
            Err(err)
                if err.kind() == ErrorKind::WouldBlock
                    || err.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                Err(DealerError::StageLocked {
                    stage: stage.name().to_string(),
                    path,
                })
            }
            Err(err) => Err(anyhow::anyhow!("locking {} failed: {}", path.display(), err).into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StageLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!("Releasing stage lock {} failed: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();

        let held = StageLock::acquire(dir.path(), Stage::TrackDeals).unwrap();
        assert!(held.path().ends_with("ddcron-track-deals"));

        assert!(matches!(
            StageLock::acquire(dir.path(), Stage::TrackDeals),
            Err(DealerError::StageLocked { .. })
        ));
        // other stages are independent
        let other = StageLock::acquire(dir.path(), Stage::PollManifests).unwrap();

        drop(held);
        assert!(StageLock::acquire(dir.path(), Stage::TrackDeals).is_ok());
        drop(other);
    }
}
