//! Market risk parameters and runtime state.
//!
//! A market is created once by an administrator with static [`MarketParams`].
//! Open interest and the funding fields mutate on every trade and funding tick.

use crate::math::MathError;
use crate::types::{MarketId, Timestamp, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};

/// Static per-market risk configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketParams {
    /// Highest leverage a trade may request (inclusive).
    pub max_leverage: u16,
    /// Equity floor as a share of notional, in bps. Must stay below 10_000.
    pub maintenance_margin_bps: u16,
    /// Absolute cap on the funding rate (quote ticks per base unit per second).
    pub max_funding_rate: i64,
    /// Minimum seconds between two funding rate changes.
    pub funding_interval_secs: i64,
    /// Share of closed notional charged on forced liquidation, in bps.
    pub liquidation_fee_bps: u16,
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            max_leverage: 20,
            maintenance_margin_bps: 500,
            max_funding_rate: 1_000,
            funding_interval_secs: 3_600,
            liquidation_fee_bps: 250,
        }
    }
}

impl MarketParams {
    pub fn validate(&self) -> Result<(), MarketError> {
        if self.max_leverage == 0 {
            return Err(MarketError::InvalidMaxLeverage(self.max_leverage));
        }
        if self.maintenance_margin_bps >= BPS_DENOMINATOR {
            return Err(MarketError::InvalidMaintenanceMargin(self.maintenance_margin_bps));
        }
        if self.max_funding_rate < 0 || self.funding_interval_secs <= 0 {
            return Err(MarketError::InvalidFundingParams {
                max_funding_rate: self.max_funding_rate,
                funding_interval_secs: self.funding_interval_secs,
            });
        }
        if self.liquidation_fee_bps >= BPS_DENOMINATOR {
            return Err(MarketError::InvalidLiquidationFee(self.liquidation_fee_bps));
        }
        // initial margin at max leverage must cover maintenance
        if u32::from(self.max_leverage) * u32::from(self.maintenance_margin_bps) > u32::from(BPS_DENOMINATOR) {
            return Err(MarketError::LeverageBelowMaintenance {
                max_leverage: self.max_leverage,
                maintenance_margin_bps: self.maintenance_margin_bps,
            });
        }
        Ok(())
    }
}

/// Runtime state of one market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub params: MarketParams,
    /// Current funding rate. positive = longs pay shorts.
    pub funding_rate: i64,
    /// Signed cumulative funding per base unit since market creation.
    pub cumulative_funding: i128,
    /// Time up to which `cumulative_funding` has been accrued.
    pub last_funding_timestamp: Timestamp,
    /// Time of the last funding rate change.
    pub last_rate_update: Timestamp,
    /// Sum of notional added at execution price minus notional removed at execution price.
    pub open_interest: i128,
}

impl Market {
    pub fn new(id: MarketId, params: MarketParams, now: Timestamp) -> Result<Self, MarketError> {
        params.validate()?;
        Ok(Self {
            id,
            params,
            funding_rate: 0,
            cumulative_funding: 0,
            last_funding_timestamp: now,
            last_rate_update: now,
            open_interest: 0,
        })
    }

    pub fn leverage_allowed(&self, leverage: u16) -> bool {
        leverage >= 1 && leverage <= self.params.max_leverage
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    #[error("max leverage must be at least 1, got {0}")]
    InvalidMaxLeverage(u16),

    #[error("maintenance margin must be below 10000 bps, got {0}")]
    InvalidMaintenanceMargin(u16),

    #[error("invalid funding params: max rate {max_funding_rate}, interval {funding_interval_secs}s")]
    InvalidFundingParams {
        max_funding_rate: i64,
        funding_interval_secs: i64,
    },

    #[error("liquidation fee must be below 10000 bps, got {0}")]
    InvalidLiquidationFee(u16),

    #[error("{max_leverage}x leverage posts less than the {maintenance_margin_bps} bps maintenance margin")]
    LeverageBelowMaintenance {
        max_leverage: u16,
        maintenance_margin_bps: u16,
    },

    #[error("funding rate changed {elapsed}s ago, interval is {interval}s")]
    FundingTooSoon { elapsed: i64, interval: i64 },

    #[error("funding accrual: {0}")]
    Arithmetic(#[from] MathError),
}
