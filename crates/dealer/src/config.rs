//! Resolution of the effective run configuration.
//!
//! Precedence per key: command-line flag or its environment variable, then the
//! TOML config file, then the built-in default.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cli::GlobalArgs;
use crate::error::{DealerError, Result};

pub const CONFIG_FILE_NAME: &str = "discover-dealer.toml";
pub const DEFAULT_LOTUS_API: &str = "http://localhost:1234";
pub const DEFAULT_PG_CONNSTRING: &str = "postgres:///postgres?user=discover&password=&host=/var/run/postgresql";

/// Keys accepted in the config file. Names follow the command-line flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    #[serde(rename = "lotus-api")]
    pub lotus_api: Option<String>,
    #[serde(rename = "lotus-api-token")]
    pub lotus_api_token: Option<String>,
    #[serde(rename = "lotus-lookback-epochs")]
    pub lotus_lookback_epochs: Option<u32>,
    #[serde(rename = "discover-pg-connstring")]
    pub discover_pg_connstring: Option<String>,
    pub manifests_s3_region: Option<String>,
    pub manifests_s3_bucket: Option<String>,
    pub prometheus_push_url: Option<String>,
    pub prometheus_push_user: Option<String>,
    pub prometheus_push_pass: Option<String>,
    #[serde(rename = "lock-dir")]
    pub lock_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| DealerError::Config(format!("invalid config file: {}", e)))
    }

    /// An explicitly named file must exist; the default location is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => {
                debug!("Loading config file {}", path.display());
                Self::parse(&text)
            }
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(DealerError::Config(format!(
                "reading config file {} failed: {}",
                path.display(),
                e
            ))),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(CONFIG_FILE_NAME))
}

#[derive(Debug, Clone)]
pub struct PushSettings {
    pub url: String,
    pub user: Option<String>,
    pub pass: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DealerConfig {
    pub lotus_api: String,
    pub lotus_api_token: Option<String>,
    pub lookback_epochs: i64,
    pub pg_connstring: String,
    pub manifests_s3_region: Option<String>,
    pub manifests_s3_bucket: Option<String>,
    pub push: Option<PushSettings>,
    pub lock_dir: PathBuf,
}

impl DealerConfig {
    pub fn resolve(args: &GlobalArgs, file: FileConfig) -> Self {
        let push = non_empty(args.prometheus_push_url.clone().or(file.prometheus_push_url)).map(|url| PushSettings {
            url,
            user: non_empty(args.prometheus_push_user.clone().or(file.prometheus_push_user)),
            pass: non_empty(args.prometheus_push_pass.clone().or(file.prometheus_push_pass)),
        });

        Self {
            lotus_api: non_empty(args.lotus_api.clone().or(file.lotus_api))
                .unwrap_or_else(|| DEFAULT_LOTUS_API.to_string()),
            lotus_api_token: non_empty(args.lotus_api_token.clone().or(file.lotus_api_token)),
            lookback_epochs: args
                .lotus_lookback_epochs
                .or(file.lotus_lookback_epochs)
                .map(i64::from)
                .unwrap_or(lotus::constants::DEFAULT_LOOKBACK_EPOCHS),
            pg_connstring: non_empty(args.discover_pg_connstring.clone().or(file.discover_pg_connstring))
                .unwrap_or_else(|| DEFAULT_PG_CONNSTRING.to_string()),
            manifests_s3_region: non_empty(args.manifests_s3_region.clone().or(file.manifests_s3_region)),
            manifests_s3_bucket: non_empty(args.manifests_s3_bucket.clone().or(file.manifests_s3_bucket)),
            push,
            lock_dir: args
                .lock_dir
                .clone()
                .or(file.lock_dir)
                .unwrap_or_else(env::temp_dir),
        }
    }

    pub fn load(args: &GlobalArgs) -> Result<Self> {
        let file = FileConfig::load(args.config.as_deref())?;
        Ok(Self::resolve(args, file))
    }

    pub fn require_bucket(&self) -> Result<&str> {
        self.manifests_s3_bucket
            .as_deref()
            .ok_or_else(|| DealerError::Config("manifests_s3_bucket is not configured".to_string()))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
