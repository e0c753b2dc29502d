// 8.0.2: result types and errors for engine operations.

use crate::events::TradeRecord;
use crate::funding::FundingSettlement;
use crate::math::MathError;
use crate::oracle::OracleError;
use crate::position::Position;
use crate::types::{MarketId, UserId};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeOutcome {
    pub record: TradeRecord,
    /// Position as committed.
    pub position: Position,
    /// Net debit of free collateral. negative = credited.
    pub margin_delta: i128,
    pub collateral_returned: u64,
    pub realized_pnl: i128,
    pub funding: FundingSettlement,
    /// Loss beyond the margin released by the close.
    pub shortfall: u64,
    /// Unpaid remainder the protocol absorbs, funding shortfall included.
    pub bad_debt: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingOutcome {
    pub record: TradeRecord,
    pub settlement: FundingSettlement,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationOutcome {
    pub trade: TradeOutcome,
    /// Taken out of the returned collateral, paid out by the host.
    pub fee: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionHealth {
    /// Settled collateral plus unrealized pnl.
    pub equity: i128,
    pub maintenance_requirement: i128,
    pub notional: i128,
    /// equity / notional. None for an empty position.
    pub margin_ratio: Option<Decimal>,
    pub liquidatable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("size must be non-zero")]
    InvalidAmount,

    #[error("leverage {requested}x outside [1, {max}]")]
    InvalidLeverage { requested: u16, max: u16 },

    #[error("insufficient collateral: required {required}, available {available}")]
    InsufficientCollateral { required: u64, available: u64 },

    #[error("no open position")]
    NoOpenPosition,

    #[error("position is healthy: equity {equity}, maintenance {maintenance}")]
    NotLiquidatable { equity: i128, maintenance: i128 },

    #[error("trade would leave the position below maintenance: equity {equity}, maintenance {maintenance}")]
    UnhealthyAfterTrade { equity: i128, maintenance: i128 },

    #[error("{user} already has the maximum number of open positions")]
    TooManyPositions { user: UserId },

    #[error("records do not belong together: position {position_owner}/{position_market}, account {account_owner}, market {market}")]
    AccountMismatch {
        position_owner: UserId,
        position_market: MarketId,
        account_owner: UserId,
        market: MarketId,
    },

    #[error("arithmetic overflow: {0}")]
    ArithmeticOverflow(#[from] MathError),

    #[error("oracle: {0}")]
    Oracle(#[from] OracleError),
}
