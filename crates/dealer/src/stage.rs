use std::fmt;

use crate::cli::Commands;

/// An independently scheduled pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    PollManifests,
    ProposePending,
    TrackDeals,
    ProviderEligibility,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::PollManifests => "poll-manifests",
            Stage::ProposePending => "propose-pending",
            Stage::TrackDeals => "track-deals",
            Stage::ProviderEligibility => "provider-eligibility",
        }
    }

    /// Stages whose run outcome is pushed to the metrics gateway.
    pub fn pushes_metrics(&self) -> bool {
        matches!(
            self,
            Stage::PollManifests | Stage::ProposePending | Stage::TrackDeals
        )
    }
}

impl From<&Commands> for Stage {
    fn from(command: &Commands) -> Self {
        match command {
            Commands::PollManifests { .. } => Stage::PollManifests,
            Commands::ProposePending { .. } => Stage::ProposePending,
            Commands::TrackDeals => Stage::TrackDeals,
            Commands::ProviderEligibility { .. } => Stage::ProviderEligibility,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
