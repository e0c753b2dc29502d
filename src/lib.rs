// perps-margin: position & margin accounting core for perpetual futures.
// integer ticks end to end, explicit rounding, no partial writes.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: MarketId, UserId, Side, Leverage, Timestamp
//   2.x  math.rs: widened mul_div, rounding modes, checked narrowing
//   3.x  market.rs: market risk params + runtime state (OI, funding fields)
//   4.x  oracle.rs: oracle price, resolvers, staleness guard, clocks
//   5.x  position.rs: position record, pnl, increase/reduce planners
//   6.x  funding.rs: cumulative funding index, rate updates, settlement
//   7.x  config.rs: TOML settings, logging, market presets
//   8.x  engine/: open/increase, decrease/close, flip, liquidation, funding
//   9.x  events.rs: trade records + event log for audit
//   10.x exchange.rs: in-memory host: keyed stores, clock, price resolver
//   11.x insurance.rs: insurance fund drawn on for bad debt
//   account.rs: user ledger (free collateral, open position count)

pub mod account;
pub mod config;
pub mod engine;
pub mod events;
pub mod exchange;
pub mod funding;
pub mod insurance;
pub mod market;
pub mod math;
pub mod oracle;
pub mod position;
pub mod types;

// re exports for convenience
pub use account::{AccountError, UserAccount};
pub use config::{ConfigError, LoggingConfig, MarketPreset, OracleSettings, Settings};
pub use engine::*;
pub use events::*;
pub use exchange::{Exchange, ExchangeError};
pub use funding::FundingSettlement;
pub use insurance::InsuranceFund;
pub use market::{Market, MarketError, MarketParams};
pub use math::{MathError, Rounding};
pub use oracle::*;
pub use position::Position;
pub use types::*;
