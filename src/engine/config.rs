//! Engine configuration options.

use serde::{Deserialize, Serialize};

/// Who covers a loss that exceeds the margin posted to a position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallPolicy {
    /// Returned collateral is clamped at zero; the remainder becomes bad debt.
    #[default]
    ProtocolAbsorbs,
    /// The remainder is debited from the user's free collateral first.
    DrawFromFreeCollateral,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub shortfall_policy: ShortfallPolicy,
    /// Maximum number of events a host retains in memory.
    pub max_events: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shortfall_policy: ShortfallPolicy::ProtocolAbsorbs,
            max_events: 100_000,
        }
    }
}
