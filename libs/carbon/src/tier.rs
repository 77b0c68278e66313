//! Affinity tiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TierError;

/// Soft scheduling-preference weight derived from carbon-intensity rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum AffinityTier {
    Low,
    Medium,
    High,
}

impl AffinityTier {
    /// Tiers in assignment order: rank 0 (cleanest region) gets `High`.
    pub const SEQUENCE: [AffinityTier; 3] =
        [AffinityTier::High, AffinityTier::Medium, AffinityTier::Low];

    /// Numeric tier value, also used as the preference weight.
    pub fn value(self) -> u32 {
        match self {
            AffinityTier::High => 100,
            AffinityTier::Medium => 50,
            AffinityTier::Low => 10,
        }
    }

    /// Tier for a 0-based rank, if the rank is within the sequence.
    pub fn for_rank(rank: usize) -> Option<Self> {
        Self::SEQUENCE.get(rank).copied()
    }

    /// Label value form (`"100"`, `"50"`, `"10"`).
    pub fn label_value(self) -> String {
        self.value().to_string()
    }
}

impl fmt::Display for AffinityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl TryFrom<u32> for AffinityTier {
    type Error = TierError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            100 => Ok(AffinityTier::High),
            50 => Ok(AffinityTier::Medium),
            10 => Ok(AffinityTier::Low),
            other => Err(TierError::Unknown(other)),
        }
    }
}

impl From<AffinityTier> for u32 {
    fn from(tier: AffinityTier) -> Self {
        tier.value()
    }
}

impl FromStr for AffinityTier {
    type Err = TierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| TierError::NotNumeric(s.to_string()))?;
        Self::try_from(value)
    }
}
