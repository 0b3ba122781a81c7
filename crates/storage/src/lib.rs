pub mod bucket;
pub mod constants;
pub mod s3;

pub use bucket::{ManifestBucket, ManifestStore, RemoteManifest, manifest_key, parse_manifest_key};
pub use s3::{ObjectSummary, S3Client};
