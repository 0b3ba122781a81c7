//! One invocation of a pipeline stage: lock, run, report.

use futures::FutureExt;
use lotus::{ChainLookbackResolver, LotusClient, ProviderEligibility};
use monitoring::{PushConfig, PushGateway};
use std::any::Any;
use std::io::IsTerminal;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::{ManifestStore, S3Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::DealerConfig;
use crate::dispatch::DealProposalDispatcher;
use crate::error::{DealerError, Result};
use crate::ingest::ManifestIngestor;
use crate::lock::StageLock;
use crate::stage::Stage;
use crate::track::DealLifecycleTracker;

/// Runs the selected stage and returns the process exit code.
pub async fn run(cli: Cli, token: CancellationToken) -> i32 {
    let stage = Stage::from(&cli.command);

    let config = match DealerConfig::load(&cli.global) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };

    let _lock = match StageLock::acquire(&config.lock_dir, stage) {
        Ok(lock) => lock,
        Err(e @ DealerError::StageLocked { .. }) => {
            // cron mails whatever lands on stderr; contention is routine there
            if std::io::stderr().is_terminal() {
                eprintln!("{}", e);
            }
            return 1;
        }
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };

    info!("=== BEGIN '{}' run", stage);
    let started = Instant::now();

    let result = AssertUnwindSafe(execute(&cli.command, &config, &token))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(DealerError::Panic(panic_message(payload))));

    let took = started.elapsed();
    match &result {
        Ok(()) => info!("=== FINISH '{}' run success=true took={:?}", stage, took),
        Err(e) => warn!("=== FINISH '{}' run success=false took={:?} error: {}", stage, took, e),
    }

    report_metrics(stage, &config, took, result.is_ok()).await;

    if result.is_ok() { 0 } else { 1 }
}

async fn execute(command: &Commands, config: &DealerConfig, token: &CancellationToken) -> Result<()> {
    match command {
        Commands::PollManifests { fetch_concurrency } => {
            let bucket = config.require_bucket()?.to_string();
            let s3 = S3Client::new(bucket, config.manifests_s3_region.clone()).await?;
            let ledger = db::Database::new(&config.pg_connstring).await?;

            let ingestor = ManifestIngestor::new(Arc::new(ManifestStore::new(s3)?), Arc::new(ledger))?
                .with_fetch_concurrency(*fetch_concurrency);
            ingestor.ingest(token).await?;
        }
        Commands::ProposePending {
            submit_timeout_secs,
            pause_secs,
        } => {
            let node = Arc::new(LotusClient::new(&config.lotus_api, config.lotus_api_token.clone())?);
            let ledger = db::Database::new(&config.pg_connstring).await?;

            let dispatcher = DealProposalDispatcher::new(node, Arc::new(ledger))
                .with_submit_timeout(Duration::from_secs(*submit_timeout_secs))
                .with_pause(Duration::from_secs(*pause_secs));
            dispatcher.dispatch(token).await?;
        }
        Commands::TrackDeals => {
            let node = Arc::new(LotusClient::new(&config.lotus_api, config.lotus_api_token.clone())?);
            let resolver = ChainLookbackResolver::new(node.clone(), config.lookback_epochs);
            let ledger = db::Database::new(&config.pg_connstring).await?;

            let tracker = DealLifecycleTracker::new(node, resolver, Arc::new(ledger));
            tracker.reconcile(token).await?;
        }
        Commands::ProviderEligibility { addresses } => {
            let node = Arc::new(LotusClient::new(&config.lotus_api, config.lotus_api_token.clone())?);
            let resolver = ChainLookbackResolver::new(node.clone(), config.lookback_epochs);
            let eligibility = ProviderEligibility::new(node, resolver);

            for address in addresses {
                let verdict = token
                    .run_until_cancelled(eligibility.ineligible_reason(address))
                    .await
                    .ok_or(DealerError::Cancelled)??;
                match verdict {
                    None => println!("{}\teligible", address),
                    Some(reason) => println!("{}\tineligible: {}", address, reason),
                }
            }
        }
    }
    Ok(())
}

async fn report_metrics(stage: Stage, config: &DealerConfig, took: Duration, success: bool) {
    if !stage.pushes_metrics() {
        debug!("Metrics are not pushed for '{}' runs", stage);
        return;
    }
    let Some(push) = &config.push else {
        warn!("prometheus_push_url not configured, metrics of '{}' run not pushed", stage);
        return;
    };

    let gateway = match PushGateway::new(
        PushConfig::new(push.url.clone()).with_basic_auth(push.user.clone(), push.pass.clone()),
    ) {
        Ok(gateway) => gateway,
        Err(e) => {
            warn!("Metrics push gateway unavailable: {}", e);
            return;
        }
    };
    if let Err(e) = gateway.push_run(stage.name(), took, success).await {
        warn!("Pushing metrics of '{}' run failed: {}", stage, e);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic payload");
    }

    async fn exploding_stage() -> Result<()> {
        panic!("reconcile exploded")
    }

    #[tokio::test]
    async fn test_trapped_panic_becomes_error() {
        let result: Result<()> = AssertUnwindSafe(exploding_stage())
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(DealerError::Panic(panic_message(payload))));

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "panic encountered: reconcile exploded");
    }
}
