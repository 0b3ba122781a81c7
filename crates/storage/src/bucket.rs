use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::constants::{MANIFEST_KEY_PATTERN, MANIFEST_PREFIX};
use crate::s3::S3Client;

/// A manifest as seen in the bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteManifest {
    pub id: String,
    /// Last-modified time reported by the store; authoritative upload time.
    pub uploaded_at: DateTime<Utc>,
}

#[async_trait]
pub trait ManifestBucket: Send + Sync {
    /// Every manifest currently in the bucket.
    async fn list_manifests(&self) -> Result<Vec<RemoteManifest>>;

    /// Raw body of one manifest.
    async fn fetch_manifest(&self, id: &str) -> Result<Vec<u8>>;
}

/// Manifest id from an object key, `None` for keys outside the manifest layout.
pub fn parse_manifest_key(pattern: &Regex, key: &str) -> Option<String> {
    pattern
        .captures(key)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn manifest_key(id: &str) -> String {
    format!("{}{}.json", MANIFEST_PREFIX, id)
}

pub struct ManifestStore {
    s3: S3Client,
    key_pattern: Regex,
}

impl ManifestStore {
    pub fn new(s3: S3Client) -> Result<Self> {
        let key_pattern =
            Regex::new(MANIFEST_KEY_PATTERN).map_err(|e| anyhow!("Invalid manifest key pattern: {}", e))?;
        Ok(Self { s3, key_pattern })
    }
}

#[async_trait]
impl ManifestBucket for ManifestStore {
    async fn list_manifests(&self) -> Result<Vec<RemoteManifest>> {
        let objects = self.s3.list_objects(MANIFEST_PREFIX).await?;
        let total = objects.len();

        let manifests: Vec<RemoteManifest> = objects
            .into_iter()
            .filter_map(|object| {
                parse_manifest_key(&self.key_pattern, &object.key).map(|id| RemoteManifest {
                    id,
                    uploaded_at: object.last_modified,
                })
            })
            .collect();

        if manifests.len() != total {
            debug!(
                "Ignored {} non-manifest keys in s3://{}/{}",
                total - manifests.len(),
                self.s3.bucket_name(),
                MANIFEST_PREFIX
            );
        }
        Ok(manifests)
    }

    async fn fetch_manifest(&self, id: &str) -> Result<Vec<u8>> {
        self.s3.read_object(&manifest_key(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_key_parsing() {
        let pattern = Regex::new(MANIFEST_KEY_PATTERN).unwrap();

        assert_eq!(
            parse_manifest_key(&pattern, "manifests/ZA1B2C3D-1690000000.json").as_deref(),
            Some("ZA1B2C3D-1690000000")
        );
        assert_eq!(
            parse_manifest_key(&pattern, "manifests/nested/run.json").as_deref(),
            Some("nested/run")
        );
        assert_eq!(parse_manifest_key(&pattern, "manifests/readme.txt"), None);
        assert_eq!(parse_manifest_key(&pattern, "manifests/.json"), None);
        assert_eq!(parse_manifest_key(&pattern, "other/run.json"), None);

        assert_eq!(manifest_key("run-1"), "manifests/run-1.json");
    }
}
