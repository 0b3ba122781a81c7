use anyhow::anyhow;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a tracked market deal.
///
/// `Published` may advance to `Active` or `Terminated`, `Active` only to
/// `Terminated`. `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DealStatus {
    Published,
    Active,
    Terminated,
}

impl DealStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Published => "published",
            DealStatus::Active => "active",
            DealStatus::Terminated => "terminated",
        }
    }

    /// Whether a row in this status may be overwritten with `observed`.
    /// A terminated row is never rewritten, not even with the same status.
    pub fn accepts(self, observed: DealStatus) -> bool {
        !matches!(
            (self, observed),
            (DealStatus::Terminated, _) | (DealStatus::Active, DealStatus::Published)
        )
    }

    /// The status a row ends up in when `observed` is written over `self`.
    pub fn advance(self, observed: DealStatus) -> DealStatus {
        if self.accepts(observed) { observed } else { self }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DealStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "published" => Ok(DealStatus::Published),
            "active" => Ok(DealStatus::Active),
            "terminated" => Ok(DealStatus::Terminated),
            other => Err(anyhow!("Unknown deal status: {}", other)),
        }
    }
}
