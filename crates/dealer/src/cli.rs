use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dealer-cron")]
#[command(about = "Keeps the deal ledger in step with the manifest bucket and the Filecoin chain", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Settings shared by every stage. Unset values fall back to the config file,
/// then to built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// TOML config file (default: $HOME/discover-dealer.toml when present)
    #[arg(long, global = true, env = "DEALER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Lotus full node API base URL
    #[arg(long, global = true, env = "LOTUS_API")]
    pub lotus_api: Option<String>,

    /// Bearer token for the Lotus API
    #[arg(long, global = true, env = "LOTUS_API_TOKEN", hide_env_values = true)]
    pub lotus_api_token: Option<String>,

    /// How many epochs to stay behind the chain head
    #[arg(long, global = true, env = "LOTUS_LOOKBACK_EPOCHS")]
    pub lotus_lookback_epochs: Option<u32>,

    /// Postgres connection string of the deal ledger
    #[arg(long, global = true, env = "DISCOVER_PG_CONNSTRING", hide_env_values = true)]
    pub discover_pg_connstring: Option<String>,

    #[arg(long, global = true, env = "MANIFESTS_S3_REGION")]
    pub manifests_s3_region: Option<String>,

    #[arg(long, global = true, env = "MANIFESTS_S3_BUCKET")]
    pub manifests_s3_bucket: Option<String>,

    /// Prometheus push gateway URL; metrics are skipped when unset
    #[arg(long, global = true, env = "PROMETHEUS_PUSH_URL")]
    pub prometheus_push_url: Option<String>,

    #[arg(long, global = true, env = "PROMETHEUS_PUSH_USER")]
    pub prometheus_push_user: Option<String>,

    #[arg(long, global = true, env = "PROMETHEUS_PUSH_PASS", hide_env_values = true)]
    pub prometheus_push_pass: Option<String>,

    /// Directory holding the per-stage lock files
    #[arg(long, global = true, env = "DEALER_LOCK_DIR")]
    pub lock_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Ingest new validation manifests from the bucket
    PollManifests {
        /// Manifest bodies fetched concurrently
        #[arg(long, env = "DEALER_FETCH_CONCURRENCY", default_value = "8")]
        fetch_concurrency: usize,
    },

    /// Submit every unresolved deal proposal to its provider
    ProposePending {
        /// Timeout of a single deal submission
        #[arg(long, env = "DEALER_SUBMIT_TIMEOUT_SECS", default_value = "30")]
        submit_timeout_secs: u64,

        /// Pause after each submission to the same provider
        #[arg(long, env = "DEALER_PAUSE_SECS", default_value = "5")]
        pause_secs: u64,
    },

    /// Reconcile on-chain market deals with the ledger
    TrackDeals,

    /// Report whether storage providers may currently receive deals
    ProviderEligibility {
        /// Provider addresses, e.g. f01234
        #[arg(required = true)]
        addresses: Vec<String>,
    },
}
