//! Liquidation detection and execution.

use super::core::{PositionEngine, TradeAccounts};
use super::positions::{build, log_commit, signed};
use super::results::{EngineError, LiquidationOutcome, PositionHealth};
use crate::events::OperationKind;
use crate::funding;
use crate::market::Market;
use crate::math::{self, Rounding};
use crate::oracle::OraclePrice;
use crate::position::Position;
use crate::types::{Side, BPS_DENOMINATOR};
use rust_decimal::Decimal;

/// Equity against the maintenance requirement at `price`, with pending funding
/// settled on a copy first. Reads only.
pub fn position_health(position: &Position, market: &Market, price: i64) -> Result<PositionHealth, EngineError> {
    let settled = funding::compute_settlement(position, market.cumulative_funding)?;
    let mut projected = position.clone();
    funding::apply_settlement(&mut projected, &settled);

    let equity = projected.equity(price)?;
    let notional = projected.notional(price)?;
    // |size| * price * mm_bps / 10_000, ceil
    let maintenance = math::mul_div_signed(
        notional,
        market.params.maintenance_margin_bps as i128,
        BPS_DENOMINATOR as i128,
        Rounding::Ceil,
    )?;

    let margin_ratio = if notional == 0 {
        None
    } else {
        Decimal::try_from_i128_with_scale(equity, 0)
            .ok()
            .zip(Decimal::try_from_i128_with_scale(notional, 0).ok())
            .and_then(|(e, n)| e.checked_div(n))
    };

    Ok(PositionHealth {
        equity,
        maintenance_requirement: maintenance,
        notional,
        margin_ratio,
        liquidatable: !projected.is_empty() && equity < maintenance,
    })
}

impl PositionEngine {
    /// [`position_health`] behind the same price checks every operation runs.
    pub fn health(
        &self,
        position: &Position,
        market: &Market,
        price: &OraclePrice,
    ) -> Result<PositionHealth, EngineError> {
        let price = self.check_price(price)?;
        position_health(position, market, price)
    }

    /// True when equity has fallen below the maintenance requirement.
    /// An empty position is never liquidatable.
    pub fn is_liquidatable(
        &self,
        position: &Position,
        market: &Market,
        price: &OraclePrice,
    ) -> Result<bool, EngineError> {
        let price = self.check_price(price)?;
        if position.is_empty() {
            return Ok(false);
        }
        Ok(position_health(position, market, price)?.liquidatable)
    }

    /// Forced full close at the oracle price. The liquidation fee comes out of the
    /// collateral that would have been returned, never below zero.
    pub fn liquidate(
        &self,
        accounts: TradeAccounts<'_>,
        price: &OraclePrice,
    ) -> Result<LiquidationOutcome, EngineError> {
        if accounts.position.is_empty() {
            return Err(EngineError::NoOpenPosition);
        }
        let price = self.check_price(price)?;

        let mut working = self.load(&accounts)?;
        let funding = working.settle_funding()?;

        let health = position_health(&working.position, &working.market, price)?;
        tracing::debug!(
            user = %working.position.owner,
            equity = %health.equity,
            maintenance = %health.maintenance_requirement,
            "liquidation check"
        );
        if !health.liquidatable {
            return Err(EngineError::NotLiquidatable {
                equity: health.equity,
                maintenance: health.maintenance_requirement,
            });
        }

        let direction = working.position.side().map_or(Side::Long, |s| s.opposite());
        let close = working.reduce(u64::MAX, price, self.config.shortfall_policy)?;

        // fee on the closed notional, floored, capped by what the close returned
        let closed_notional = math::checked_mul(close.close_size as i128, price as i128)?;
        let fee_due = math::mul_div_signed(
            closed_notional,
            working.market.params.liquidation_fee_bps as i128,
            BPS_DENOMINATOR as i128,
            Rounding::Floor,
        )?;
        let fee = math::to_u64(fee_due)?.min(close.collateral_returned);
        working.account.free_collateral -= fee;

        let size_delta = signed(direction, close.close_size)?;
        let margin_delta = close.net_debit() + fee as i128;
        let mut trade = build(
            &working,
            OperationKind::Liquidation,
            size_delta,
            price,
            margin_delta,
            funding,
            close,
        );
        trade.collateral_returned -= fee;

        log_commit(&trade);
        tracing::info!(user = %trade.record.user, market = %trade.record.market, fee, "position liquidated");
        working.commit(accounts);
        Ok(LiquidationOutcome { trade, fee })
    }
}
