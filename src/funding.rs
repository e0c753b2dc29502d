// 6.0: funding accumulator. each market carries a signed cumulative index that grows
// at funding_rate per second. positions snapshot the index at last touch and settle
// the difference lazily, before anything else reads or moves their collateral.
// 6.0 accrual + rate updates. 6.1 per-position settlement.

use crate::market::{Market, MarketError};
use crate::math::{self, MathResult};
use crate::position::Position;
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};

/// Index the market would carry at `now`, without writing it.
pub fn projected_index(market: &Market, now: Timestamp) -> MathResult<i128> {
    let elapsed = market.last_funding_timestamp.seconds_until(now);
    if elapsed <= 0 {
        return Ok(market.cumulative_funding);
    }
    let accrued = math::checked_mul(market.funding_rate as i128, elapsed as i128)?;
    math::checked_add(market.cumulative_funding, accrued)
}

/// Roll the cumulative index forward to `now`. Returns the amount accrued.
/// A clock that has not moved (or moved backwards) accrues nothing.
pub fn accrue(market: &mut Market, now: Timestamp) -> MathResult<i128> {
    if market.last_funding_timestamp >= now {
        return Ok(0);
    }
    let next = projected_index(market, now)?;
    let accrued = next - market.cumulative_funding;
    market.cumulative_funding = next;
    market.last_funding_timestamp = now;
    Ok(accrued)
}

// 6.0.1: admin/crank rate update. accrues at the old rate first so the change is
// never applied retroactively. returns the stored (clamped) rate.
pub fn set_funding_rate(market: &mut Market, rate: i64, now: Timestamp) -> Result<i64, MarketError> {
    let elapsed = market.last_rate_update.seconds_until(now);
    let interval = market.params.funding_interval_secs;
    if elapsed < interval {
        return Err(MarketError::FundingTooSoon { elapsed, interval });
    }

    let mut working = market.clone();
    accrue(&mut working, now)?;
    let cap = working.params.max_funding_rate;
    working.funding_rate = rate.clamp(-cap, cap);
    working.last_rate_update = now;

    *market = working;
    Ok(market.funding_rate)
}

// 6.1: base_size * (index - snapshot). positive = the position owes.
pub fn pending_funding(position: &Position, cumulative_funding: i128) -> MathResult<i128> {
    let index_delta = math::checked_sub(cumulative_funding, position.funding_index_snapshot)?;
    math::checked_mul(position.base_size as i128, index_delta)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingSettlement {
    /// Signed amount owed by the position. negative = received.
    pub payment: i128,
    pub new_collateral: u64,
    /// Part of a payment the collateral could not cover.
    pub shortfall: u64,
    pub new_snapshot: i128,
}

impl FundingSettlement {
    pub fn is_noop(&self) -> bool {
        self.payment == 0
    }
}

pub fn compute_settlement(position: &Position, cumulative_funding: i128) -> MathResult<FundingSettlement> {
    let payment = pending_funding(position, cumulative_funding)?;
    let collateral_after = math::checked_sub(position.collateral as i128, payment)?;

    // collateral never goes negative; the uncovered part is reported, not carried
    let (new_collateral, shortfall) = if collateral_after < 0 {
        (0, math::to_u64(-collateral_after)?)
    } else {
        (math::to_u64(collateral_after)?, 0)
    };

    Ok(FundingSettlement {
        payment,
        new_collateral,
        shortfall,
        new_snapshot: cumulative_funding,
    })
}

pub fn apply_settlement(position: &mut Position, settlement: &FundingSettlement) {
    position.collateral = settlement.new_collateral;
    position.funding_index_snapshot = settlement.new_snapshot;
}
