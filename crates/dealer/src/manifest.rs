//! Drive validation manifests as uploaded to the bucket.

use chrono::{DateTime, Utc};
use db::NewManifestEntry;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::error::{DealerError, Result};

/// Serial number markers seen in drive identifiers, e.g. `Serial Number: ZA1B2C3D`
/// or `WDC WD140EDGZ (S/N 9LGZ0ABC)`.
const DRIVE_SERIAL_PATTERN: &str = r"(?i)\b(?:serial(?:[\s_-]*(?:number|no\.?))?|s/?n)\s*[:=#]?\s*([A-Za-z0-9][A-Za-z0-9_-]{3,})";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestDocument {
    #[serde(default)]
    pub drive_identifier: String,
    pub validation_start: DateTime<Utc>,
    #[serde(default)]
    pub validation_finish: Option<DateTime<Utc>>,
    #[serde(default)]
    pub soft_failures: i64,
    #[serde(default)]
    pub hard_failures: i64,
    #[serde(default)]
    pub flawless: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub carfiles_per_dataset: BTreeMap<String, i64>,
    /// Keyed by claimed root CID.
    #[serde(default, deserialize_with = "null_as_default")]
    pub carfiles: BTreeMap<String, CarEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CarEntry {
    pub full_path: String,
    #[serde(rename = "DatasetID", default)]
    pub dataset_id: i16,
    #[serde(default)]
    pub byte_size: i64,
    #[serde(default)]
    pub byte_size_validated: bool,
    #[serde(default)]
    pub car_header_validated: bool,
    #[serde(default)]
    pub commp_validated: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub soft_fails: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub hard_fails: Vec<String>,
}

/// Uploaders write empty lists and maps as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Compact validation summary stored with each manifest entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySummary {
    pub valid_size: bool,
    pub valid_header: bool,
    pub valid_commp: bool,
    pub size: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub soft_failures: Vec<String>,
}

impl From<&CarEntry> for EntrySummary {
    fn from(car: &CarEntry) -> Self {
        Self {
            valid_size: car.byte_size_validated,
            valid_header: car.car_header_validated,
            valid_commp: car.commp_validated,
            size: car.byte_size,
            failures: car.hard_fails.clone(),
            soft_failures: car.soft_fails.clone(),
        }
    }
}

impl ManifestDocument {
    pub fn decode(id: &str, body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| DealerError::ManifestDecode {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn entries(&self, manifest_id: &str) -> Result<Vec<NewManifestEntry>> {
        self.carfiles
            .iter()
            .map(|(root, car)| {
                let meta = serde_json::to_value(EntrySummary::from(car)).map_err(|e| DealerError::ManifestDecode {
                    id: manifest_id.to_string(),
                    reason: format!("summarizing entry {}: {}", root, e),
                })?;
                Ok(NewManifestEntry {
                    manifest_id: manifest_id.to_string(),
                    claimed_root_cid: root.clone(),
                    local_path: car.full_path.clone(),
                    meta,
                })
            })
            .collect()
    }
}

/// Best-effort serial number extraction from free-text drive identifiers.
#[derive(Debug, Clone)]
pub struct DriveSerialPattern {
    pattern: Regex,
}

impl DriveSerialPattern {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(DRIVE_SERIAL_PATTERN)
            .map_err(|e| DealerError::Config(format!("invalid drive serial pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    pub fn extract(&self, drive_identifier: &str) -> Option<String> {
        self.pattern
            .captures(drive_identifier)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_uppercase())
    }
}
