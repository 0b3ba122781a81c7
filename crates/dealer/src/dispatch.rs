//! Submission of unresolved deal proposals to their providers.
//!
//! Proposals are grouped per provider. Groups run concurrently; within a group
//! proposals go out one at a time in ledger order with a pause after each, so no
//! provider sees more than one submission per pause interval from this process.

use chrono::Utc;
use db::{PendingProposal, ProposalLedger};
use lotus::DealApi;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DealerError, Result};

pub const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PAUSE_SECS: u64 = 5;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub providers: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Outcomes that could not be recorded, or were already recorded by another run.
    pub write_failures: usize,
}

impl DispatchSummary {
    fn absorb(&mut self, other: DispatchSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.write_failures += other.write_failures;
    }
}

pub struct DealProposalDispatcher {
    api: Arc<dyn DealApi>,
    ledger: Arc<dyn ProposalLedger>,
    submit_timeout: Duration,
    pause: Duration,
}

impl DealProposalDispatcher {
    pub fn new(api: Arc<dyn DealApi>, ledger: Arc<dyn ProposalLedger>) -> Self {
        Self {
            api,
            ledger,
            submit_timeout: Duration::from_secs(DEFAULT_SUBMIT_TIMEOUT_SECS),
            pause: Duration::from_secs(DEFAULT_PAUSE_SECS),
        }
    }

    pub fn with_submit_timeout(mut self, submit_timeout: Duration) -> Self {
        self.submit_timeout = submit_timeout;
        self
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Returns once every provider group has finished or observed the cancellation.
    pub async fn dispatch(&self, token: &CancellationToken) -> Result<DispatchSummary> {
        let pending = token
            .run_until_cancelled(self.ledger.pending_proposals())
            .await
            .ok_or(DealerError::Cancelled)??;

        let groups = group_by_provider(pending);
        let mut summary = DispatchSummary {
            providers: groups.len(),
            ..Default::default()
        };
        info!(
            "Dispatching {} pending proposals to {} providers",
            groups.values().map(Vec::len).sum::<usize>(),
            groups.len()
        );

        let mut workers = JoinSet::new();
        for (provider, proposals) in groups {
            let worker = ProviderWorker {
                provider,
                api: self.api.clone(),
                ledger: self.ledger.clone(),
                submit_timeout: self.submit_timeout,
                pause: self.pause,
                token: token.clone(),
            };
            workers.spawn(worker.run(proposals));
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => summary.absorb(outcome),
                Err(e) if e.is_panic() => {
                    error!("Provider worker panicked: {}", e);
                    first_error.get_or_insert(DealerError::Panic(format!("provider worker: {}", e)));
                }
                Err(e) => {
                    warn!("Provider worker did not complete: {}", e);
                }
            }
        }

        info!(
            "summary: unique_providers={} successful={} failed={} write_failures={}",
            summary.providers, summary.succeeded, summary.failed, summary.write_failures
        );

        if let Some(e) = first_error {
            return Err(e);
        }
        if token.is_cancelled() {
            return Err(DealerError::Cancelled);
        }
        Ok(summary)
    }
}

/// Per-provider queues, each in the order the ledger returned them.
pub fn group_by_provider(pending: Vec<PendingProposal>) -> BTreeMap<String, Vec<PendingProposal>> {
    let mut groups: BTreeMap<String, Vec<PendingProposal>> = BTreeMap::new();
    for proposal in pending {
        groups.entry(proposal.provider.clone()).or_default().push(proposal);
    }
    groups
}

struct ProviderWorker {
    provider: String,
    api: Arc<dyn DealApi>,
    ledger: Arc<dyn ProposalLedger>,
    submit_timeout: Duration,
    pause: Duration,
    token: CancellationToken,
}

impl ProviderWorker {
    async fn run(self, proposals: Vec<PendingProposal>) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        for proposal in proposals {
            let Some(submitted) = self
                .token
                .run_until_cancelled(timeout(self.submit_timeout, self.api.client_stateless_deal(&proposal.payload)))
                .await
            else {
                debug!("Provider {}: cancelled during submission", self.provider);
                break;
            };

            match submitted {
                Ok(Ok(cid)) => {
                    summary.succeeded += 1;
                    info!(
                        "Proposal of {} to {} accepted as {}",
                        proposal.piece_cid, self.provider, cid
                    );
                    let recorded = self
                        .ledger
                        .record_proposal_success(&self.provider, &proposal.piece_cid, &cid.root)
                        .await;
                    self.note_write(&mut summary, &proposal, recorded);
                }
                Ok(Err(e)) => {
                    summary.failed += 1;
                    self.record_failure(&mut summary, &proposal, &e.to_string()).await;
                }
                Err(_) => {
                    summary.failed += 1;
                    let reason = format!("deal submission timed out after {:?}", self.submit_timeout);
                    self.record_failure(&mut summary, &proposal, &reason).await;
                }
            }

            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!("Provider {}: cancelled during pause", self.provider);
                    break;
                }
                _ = sleep(self.pause) => {}
            }
        }

        summary
    }

    async fn record_failure(&self, summary: &mut DispatchSummary, proposal: &PendingProposal, reason: &str) {
        warn!(
            "Proposal of {} to {} failed: {}",
            proposal.piece_cid, self.provider, reason
        );
        let failure = format!(
            "{} : {}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            reason
        );
        let recorded = self
            .ledger
            .record_proposal_failure(&self.provider, &proposal.piece_cid, &failure)
            .await;
        self.note_write(summary, proposal, recorded);
    }

    fn note_write(&self, summary: &mut DispatchSummary, proposal: &PendingProposal, recorded: anyhow::Result<bool>) {
        match recorded {
            Ok(true) => {}
            Ok(false) => {
                summary.write_failures += 1;
                warn!(
                    "Proposal of {} to {} was resolved concurrently, outcome discarded",
                    proposal.piece_cid, self.provider
                );
            }
            Err(e) => {
                summary.write_failures += 1;
                warn!(
                    "Recording outcome of proposal {} to {} failed: {}",
                    proposal.piece_cid, self.provider, e
                );
            }
        }
    }
}
