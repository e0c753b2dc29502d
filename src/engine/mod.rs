// 8.0: position & margin engine. a pure state transition over one market, one user
// ledger and one position record. every call computes on working copies and commits
// only after every check passes. no I/O, no clock; the host serializes calls.

mod config;
mod core;
mod funding;
mod liquidations;
mod positions;
mod results;

pub use config::{EngineConfig, ShortfallPolicy};
pub use core::{PositionEngine, TradeAccounts};
pub use liquidations::position_health;
pub use positions::CloseAmount;
pub use results::{
    EngineError, FundingOutcome, LiquidationOutcome, PositionHealth, TradeOutcome,
};
