//! Opening, growing, shrinking and flipping positions.

use super::core::{CloseStep, PositionEngine, TradeAccounts, Working};
use super::results::{EngineError, TradeOutcome};
use crate::events::{OperationKind, TradeRecord};
use crate::funding::FundingSettlement;
use crate::oracle::OraclePrice;
use crate::types::Side;
use serde::{Deserialize, Serialize};

/// How much of a position to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseAmount {
    All,
    /// Clamped to the position size.
    Size(u64),
}

impl From<u64> for CloseAmount {
    fn from(size: u64) -> Self {
        CloseAmount::Size(size)
    }
}

impl PositionEngine {
    /// Open a position or add to it. An opposite-side request is routed by size:
    /// smaller than the position reduces it, equal closes it, larger flips it.
    pub fn open_or_increase(
        &self,
        accounts: TradeAccounts<'_>,
        price: &OraclePrice,
        side: Side,
        size_delta: u64,
        leverage: u16,
    ) -> Result<TradeOutcome, EngineError> {
        if size_delta == 0 {
            return Err(EngineError::InvalidAmount);
        }
        let leverage = self.check_leverage(&*accounts.market, leverage)?;
        let price = self.check_price(price)?;

        let mut working = self.load(&accounts)?;
        let funding = working.settle_funding()?;
        let policy = self.config.shortfall_policy;
        let signed_size = signed(side, size_delta)?;

        let outcome = match working.position.side() {
            Some(current) if current != side => {
                let held = working.position.size();
                let close = working.reduce(size_delta.min(held), price, policy)?;
                if size_delta > held {
                    let open = working.increase(side, size_delta - held, price, leverage)?;
                    let margin_delta = close.net_debit() + open.margin_delta;
                    build(&working, OperationKind::Flip, signed_size, price, margin_delta, funding, close)
                } else {
                    let kind = if close.closed {
                        OperationKind::Close
                    } else {
                        OperationKind::Decrease
                    };
                    build(&working, kind, signed_size, price, close.net_debit(), funding, close)
                }
            }
            _ => {
                let open = working.increase(side, size_delta, price, leverage)?;
                let kind = if open.opened {
                    OperationKind::Open
                } else {
                    OperationKind::Increase
                };
                build(&working, kind, signed_size, price, open.margin_delta, funding, CloseStep::default())
            }
        };

        log_commit(&outcome);
        working.commit(accounts);
        Ok(outcome)
    }

    /// Close part or all of a position at the oracle price.
    pub fn decrease_or_close(
        &self,
        accounts: TradeAccounts<'_>,
        price: &OraclePrice,
        amount: CloseAmount,
    ) -> Result<TradeOutcome, EngineError> {
        if accounts.position.is_empty() {
            return Err(EngineError::NoOpenPosition);
        }
        let requested = match amount {
            CloseAmount::All => u64::MAX,
            CloseAmount::Size(0) => return Err(EngineError::InvalidAmount),
            CloseAmount::Size(size) => size,
        };
        let price = self.check_price(price)?;

        let mut working = self.load(&accounts)?;
        let funding = working.settle_funding()?;
        let direction = working.position.side().map_or(Side::Long, |s| s.opposite());
        let close = working.reduce(requested, price, self.config.shortfall_policy)?;

        let kind = if close.closed {
            OperationKind::Close
        } else {
            OperationKind::Decrease
        };
        let size_delta = signed(direction, close.close_size)?;
        let outcome = build(&working, kind, size_delta, price, close.net_debit(), funding, close);

        log_commit(&outcome);
        working.commit(accounts);
        Ok(outcome)
    }
}

impl CloseStep {
    // what the close took from (positive) or gave to (negative) free collateral
    pub(super) fn net_debit(&self) -> i128 {
        self.drawn_from_free as i128 - self.collateral_returned as i128
    }
}

pub(super) fn signed(side: Side, size: u64) -> Result<i64, EngineError> {
    let magnitude = i64::try_from(size).map_err(|_| crate::math::MathError::Overflow)?;
    Ok(side.sign() * magnitude)
}

pub(super) fn build(
    working: &Working,
    kind: OperationKind,
    size_delta: i64,
    price: i64,
    margin_delta: i128,
    funding: FundingSettlement,
    close: CloseStep,
) -> TradeOutcome {
    TradeOutcome {
        record: TradeRecord {
            kind,
            user: working.account.owner,
            market: working.market.id,
            size_delta,
            price,
            margin_delta,
            realized_pnl: close.realized_pnl,
            funding_paid: funding.payment,
            open_interest: working.market.open_interest,
        },
        position: working.position.clone(),
        margin_delta,
        collateral_returned: close.collateral_returned,
        realized_pnl: close.realized_pnl,
        funding,
        shortfall: close.shortfall,
        bad_debt: close.bad_debt + funding.shortfall,
    }
}

pub(super) fn log_commit(outcome: &TradeOutcome) {
    let record = &outcome.record;
    if outcome.shortfall > 0 {
        tracing::warn!(
            user = %record.user,
            market = %record.market,
            shortfall = outcome.shortfall,
            bad_debt = outcome.bad_debt,
            "loss exceeds posted margin"
        );
    }
    tracing::info!(
        kind = ?record.kind,
        user = %record.user,
        market = %record.market,
        size_delta = record.size_delta,
        price = record.price,
        margin_delta = %record.margin_delta,
        realized_pnl = %record.realized_pnl,
        open_interest = %record.open_interest,
        "position updated"
    );
}
