use anyhow::{Result, anyhow};
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Region;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::constants::{DEFAULT_S3_REGION, LIST_PAGE_SIZE, S3_READ_MAX_RETRIES, S3_READ_RETRY_DELAY_MS};

/// A listed object: its key and the store-reported last-modified time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
}

/// Read access to a single bucket. The process entrypoint owns the instance and
/// hands it to whatever needs it.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket_name: String,
}

impl S3Client {
    pub async fn new(bucket_name: String, region: Option<String>) -> Result<Self> {
        if bucket_name.is_empty() {
            return Err(anyhow!("S3 bucket name must not be empty"));
        }

        let region = region
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_S3_REGION.to_string());
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .load()
            .await;

        info!("AWS S3 client initialized for bucket {} in {}", bucket_name, region);

        Ok(Self {
            client: Client::new(&config),
            bucket_name,
        })
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    /// List every object under `prefix`, following continuation tokens until the
    /// listing is exhausted.
    pub async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let output = match self
                .client
                .list_objects_v2()
                .bucket(&self.bucket_name)
                .prefix(prefix)
                .max_keys(LIST_PAGE_SIZE)
                .set_continuation_token(continuation.take())
                .send()
                .await
            {
                Ok(output) => output,
                Err(e) => {
                    error!(
                        "S3 LIST failed - Bucket: {}, Prefix: {}, Error: {:?}",
                        self.bucket_name, prefix, e
                    );
                    if let Some(service_error) = e.as_service_error() {
                        error!("S3 Service Error Details: {:?}", service_error);
                    }
                    return Err(anyhow!("Failed to list S3 objects under {}: {}", prefix, e));
                }
            };
            pages += 1;

            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                let last_modified = object
                    .last_modified()
                    .and_then(|ts| DateTime::from_timestamp(ts.secs(), ts.subsec_nanos()))
                    .ok_or_else(|| anyhow!("S3 object {} has no usable LastModified", key))?;
                objects.push(ObjectSummary {
                    key: key.to_string(),
                    last_modified,
                });
            }

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        debug!(
            "Listed {} objects under s3://{}/{} in {} pages",
            objects.len(),
            self.bucket_name,
            prefix,
            pages
        );
        Ok(objects)
    }

    /// Fetch an object body, retrying transient failures a few times.
    pub async fn read_object(&self, key: &str) -> Result<Vec<u8>> {
        let retry_delay = Duration::from_millis(S3_READ_RETRY_DELAY_MS);

        for attempt in 1..=S3_READ_MAX_RETRIES {
            match self.read_object_once(key).await {
                Ok(data) => return Ok(data),
                Err(e) if attempt < S3_READ_MAX_RETRIES => {
                    warn!(
                        "S3 GET {} failed (attempt {}/{}): {}, retrying...",
                        key, attempt, S3_READ_MAX_RETRIES, e
                    );
                    sleep(retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(anyhow!("Failed to read {} from S3", key))
    }

    async fn read_object_once(&self, key: &str) -> Result<Vec<u8>> {
        debug!("Reading from S3 bucket {} with key: {}", self.bucket_name, key);

        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                error!(
                    "S3 GET failed - Bucket: {}, Key: {}, Error: {:?}",
                    self.bucket_name, key, e
                );
                return Err(anyhow!("Failed to read {} from S3: {}", key, e));
            }
        };

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| anyhow!("Failed to collect body of {}: {}", key, e))?;

        Ok(body.to_vec())
    }
}
