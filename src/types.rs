//! Shared scalar types for the settlement engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier (wallet address or session id).
pub type AccountId = String;

/// Token amount in base units.
pub type Amount = u128;

/// Monotonic randomness request identifier. Allocated from 1; 0 is reserved
/// as the "no request" sentinel in batch failure lists.
pub type RequestId = u64;

/// Monotonic pooled-round identifier. Allocated from 1; 0 is reserved as
/// the "not winning" sentinel returned by round filters.
pub type RoundId = u64;

/// Discrete tick (block-equivalent time unit).
pub type Tick = u64;

/// Fixed-point scale: multipliers and fee fractions are WAD-scaled.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// WAD value from tenths, e.g. `tenths(56)` is a 5.6x multiplier.
pub const fn tenths(value: u128) -> u128 {
    value * WAD / 10
}

/// Plinko risk level selecting a multiplier table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenths_scaling() {
        assert_eq!(tenths(10), WAD);
        assert_eq!(tenths(56), 56 * WAD / 10);
        assert_eq!(tenths(0), 0);
    }

    #[test]
    fn test_risk_level_display() {
        assert_eq!(RiskLevel::Medium.to_string(), "medium");
    }
}
