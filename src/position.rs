// 5.0: per user-per-market exposure. side lives in the sign of base_size:
// positive = long, negative = short, zero = empty.
// 5.1 has the pure increase / reduce planners used by the engine.

use crate::math::{self, MathResult, Rounding};
use crate::types::{Leverage, MarketId, Side, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub owner: UserId,
    pub market_id: MarketId,
    pub base_size: i64,
    pub entry_price: i64,
    pub collateral: u64,
    pub funding_index_snapshot: i128,
}

impl Position {
    pub fn empty(owner: UserId, market_id: MarketId) -> Self {
        Self {
            owner,
            market_id,
            base_size: 0,
            entry_price: 0,
            collateral: 0,
            funding_index_snapshot: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.base_size == 0
    }

    pub fn side(&self) -> Option<Side> {
        Side::of(self.base_size)
    }

    pub fn size(&self) -> u64 {
        self.base_size.unsigned_abs()
    }

    // |size| * price, exact
    pub fn notional(&self, price: i64) -> MathResult<i128> {
        math::checked_mul(self.size() as i128, price as i128)
    }

    // 5.0.1: one signed formula for both sides. base_size * (price - entry)
    pub fn unrealized_pnl(&self, price: i64) -> MathResult<i128> {
        signed_pnl(self.base_size, self.size(), self.entry_price, price)
    }

    pub fn equity(&self, price: i64) -> MathResult<i128> {
        math::checked_add(self.collateral as i128, self.unrealized_pnl(price)?)
    }

    /// An empty record carries no collateral and no entry price.
    ///
    /// The converse does not hold: funding may drain the collateral of an
    /// open position to zero, which leaves it liquidatable.
    pub fn is_consistent(&self) -> bool {
        if self.base_size == 0 {
            self.collateral == 0 && self.entry_price == 0
        } else {
            self.entry_price > 0
        }
    }

    // back to the zeroed record. the funding snapshot stays where settlement left it.
    pub(crate) fn clear(&mut self) {
        self.base_size = 0;
        self.entry_price = 0;
        self.collateral = 0;
    }
}

// sign(base) * amount * (price - entry)
fn signed_pnl(base_size: i64, amount: u64, entry_price: i64, price: i64) -> MathResult<i128> {
    let move_per_unit = math::checked_sub(price as i128, entry_price as i128)?;
    let pnl = math::checked_mul(amount as i128, move_per_unit)?;
    Ok(if base_size < 0 { -pnl } else { pnl })
}

// 5.1: same-direction growth (or first open). nothing is written, the caller commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncreasePlan {
    pub position: Position,
    pub required_margin: u64,
    /// Unrealized loss of the grown position at the execution price, posted on
    /// top of `required_margin`. zero when the position is in profit.
    pub loss_cover: u64,
    /// new collateral - old collateral. negative when the new leverage frees margin.
    pub margin_delta: i128,
    /// |size_delta| * price, added to open interest.
    pub notional_delta: i128,
    pub opened: bool,
}

pub fn plan_increase(
    position: &Position,
    side: Side,
    size_delta: u64,
    price: i64,
    leverage: Leverage,
) -> MathResult<IncreasePlan> {
    debug_assert!(
        position.side().map_or(true, |s| s == side),
        "increase must follow the existing side"
    );

    let signed_delta = side.sign() as i128 * size_delta as i128;
    let new_base_size = math::to_i64(math::checked_add(position.base_size as i128, signed_delta)?)?;
    let new_size = new_base_size.unsigned_abs() as u128;

    let new_entry_price = if position.is_empty() {
        price
    } else {
        // (|old| * entry + |delta| * price) / |new|, floored
        let old_value = position.size() as u128 * position.entry_price as u128;
        let added_value = size_delta as u128 * price as u128;
        let weighted = old_value.checked_add(added_value).ok_or(math::MathError::Overflow)?;
        let entry = math::mul_div(weighted, 1, new_size, Rounding::Floor)?;
        math::to_i64(i128::try_from(entry).map_err(|_| math::MathError::Overflow)?)?
    };

    // margin is sized on the execution price, ceil so the protocol never under-collects
    let new_notional = new_size
        .checked_mul(price as u128)
        .ok_or(math::MathError::Overflow)?;
    let required = math::mul_div(new_notional, 1, leverage.value() as u128, Rounding::Ceil)?;
    let required_margin = u64::try_from(required).map_err(|_| math::MathError::Overflow)?;

    // equity after the trade never drops below the required margin: an open
    // loss stays collateralized instead of being handed back as free margin
    let pnl_after = signed_pnl(new_base_size, new_size as u64, new_entry_price, price)?;
    let loss_cover = if pnl_after < 0 { math::to_u64(-pnl_after)? } else { 0 };
    let collateral = required_margin
        .checked_add(loss_cover)
        .ok_or(math::MathError::Overflow)?;

    let margin_delta = collateral as i128 - position.collateral as i128;
    let notional_delta = math::checked_mul(size_delta as i128, price as i128)?;

    Ok(IncreasePlan {
        position: Position {
            base_size: new_base_size,
            entry_price: new_entry_price,
            collateral,
            ..position.clone()
        },
        required_margin,
        loss_cover,
        margin_delta,
        notional_delta,
        opened: position.is_empty(),
    })
}

// 5.2: partial or full close of an existing position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducePlan {
    pub position: Position,
    /// Amount actually closed after clamping to |base_size|.
    pub close_size: u64,
    pub realized_pnl: i128,
    /// collateral * close / |base|, floored. moves out of the position.
    pub released_margin: u64,
    /// released_margin + realized_pnl. negative means the loss exceeds posted margin.
    pub settlement: i128,
    /// close_size * price, removed from open interest.
    pub notional_delta: i128,
    pub closed: bool,
}

pub fn plan_reduce(position: &Position, close_amount: u64, price: i64) -> MathResult<ReducePlan> {
    let size = position.size();
    let close_size = close_amount.min(size);

    let realized_pnl = signed_pnl(position.base_size, close_size, position.entry_price, price)?;
    let released = math::mul_div(
        position.collateral as u128,
        close_size as u128,
        size as u128,
        Rounding::Floor,
    )?;
    let released_margin = u64::try_from(released).map_err(|_| math::MathError::Overflow)?;
    let settlement = math::checked_add(released_margin as i128, realized_pnl)?;
    let notional_delta = math::checked_mul(close_size as i128, price as i128)?;

    let mut next = position.clone();
    let signed_close = position.base_size.signum() as i128 * close_size as i128;
    next.base_size = math::to_i64(math::checked_sub(position.base_size as i128, signed_close)?)?;
    next.collateral = position.collateral - released_margin;
    let closed = next.base_size == 0;
    if closed {
        next.clear();
    }

    Ok(ReducePlan {
        position: next,
        close_size,
        realized_pnl,
        released_margin,
        settlement,
        notional_delta,
        closed,
    })
}
