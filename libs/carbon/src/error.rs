//! Error types for tier parsing.

use thiserror::Error;

/// Errors that can occur when decoding an affinity tier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TierError {
    /// The label value is not a number.
    #[error("affinity tier is not a number: '{0}'")]
    NotNumeric(String),

    /// The value is a number but not one of the assignable tiers.
    #[error("unknown affinity tier: {0} (expected 100, 50 or 10)")]
    Unknown(u32),
}
