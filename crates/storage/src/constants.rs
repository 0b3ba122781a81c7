//! Constants for the manifest bucket layout and S3 access.

// =============================================================================
// Bucket Layout
// =============================================================================

/// Prefix under which validation manifests are uploaded.
pub const MANIFEST_PREFIX: &str = "manifests/";

/// Object keys outside this pattern are ignored; the capture is the manifest id.
pub const MANIFEST_KEY_PATTERN: &str = r"^manifests/(.+)\.json$";

// =============================================================================
// S3 Configuration
// =============================================================================

/// Region used when none is configured.
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Keys requested per ListObjectsV2 page (the S3 maximum).
pub const LIST_PAGE_SIZE: i32 = 1000;

/// Maximum attempts for a single object GET.
pub const S3_READ_MAX_RETRIES: u32 = 3;

/// Delay between object GET attempts (in milliseconds).
pub const S3_READ_RETRY_DELAY_MS: u64 = 500;
