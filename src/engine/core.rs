// 8.0 engine/core.rs: the engine itself, the record bundle it mutates, and the
// working copy that is committed only on success.

use super::config::{EngineConfig, ShortfallPolicy};
use super::liquidations::position_health;
use super::results::EngineError;
use crate::account::UserAccount;
use crate::funding::{self, FundingSettlement};
use crate::market::Market;
use crate::math;
use crate::oracle::{AcceptAll, OraclePrice, PriceGuard};
use crate::position::Position;
use crate::types::{Leverage, Side};

/// The three records one call reads and writes.
#[derive(Debug)]
pub struct TradeAccounts<'a> {
    pub market: &'a mut Market,
    pub account: &'a mut UserAccount,
    pub position: &'a mut Position,
}

impl<'a> TradeAccounts<'a> {
    pub fn new(market: &'a mut Market, account: &'a mut UserAccount, position: &'a mut Position) -> Self {
        Self {
            market,
            account,
            position,
        }
    }

    fn check_keys(&self) -> Result<(), EngineError> {
        if self.position.owner != self.account.owner || self.position.market_id != self.market.id {
            return Err(EngineError::AccountMismatch {
                position_owner: self.position.owner,
                position_market: self.position.market_id,
                account_owner: self.account.owner,
                market: self.market.id,
            });
        }
        Ok(())
    }
}

/** 8.1: stateless apart from its configuration. all state lives in the records */
#[derive(Debug)]
pub struct PositionEngine {
    pub(super) config: EngineConfig,
    guard: Box<dyn PriceGuard>,
}

impl Default for PositionEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl PositionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            guard: Box::new(AcceptAll),
        }
    }

    /// Install a precondition that runs on every price before it is used.
    pub fn with_price_guard(mut self, guard: impl PriceGuard + 'static) -> Self {
        self.guard = Box::new(guard);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(super) fn check_price(&self, price: &OraclePrice) -> Result<i64, EngineError> {
        price.validate()?;
        self.guard.check(price)?;
        Ok(price.price)
    }

    pub(super) fn check_leverage(&self, market: &Market, leverage: u16) -> Result<Leverage, EngineError> {
        let max = market.params.max_leverage;
        match Leverage::new(leverage) {
            Some(lev) if market.leverage_allowed(leverage) => Ok(lev),
            _ => Err(EngineError::InvalidLeverage {
                requested: leverage,
                max,
            }),
        }
    }

    pub(super) fn load(&self, accounts: &TradeAccounts<'_>) -> Result<Working, EngineError> {
        accounts.check_keys()?;
        Ok(Working {
            market: accounts.market.clone(),
            account: accounts.account.clone(),
            position: accounts.position.clone(),
        })
    }
}

/// Copies of the three records. Dropped on error, written back by `commit`.
#[derive(Debug, Clone)]
pub(super) struct Working {
    pub market: Market,
    pub account: UserAccount,
    pub position: Position,
}

/// What one close step moved.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct CloseStep {
    pub close_size: u64,
    pub realized_pnl: i128,
    pub collateral_returned: u64,
    pub drawn_from_free: u64,
    pub shortfall: u64,
    pub bad_debt: u64,
    pub closed: bool,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct OpenStep {
    pub margin_delta: i128,
    pub opened: bool,
}

impl Working {
    pub fn commit(self, accounts: TradeAccounts<'_>) {
        *accounts.market = self.market;
        *accounts.account = self.account;
        *accounts.position = self.position;
    }

    // funding is settled before anything else looks at the collateral
    pub fn settle_funding(&mut self) -> Result<FundingSettlement, EngineError> {
        let settlement = funding::compute_settlement(&self.position, self.market.cumulative_funding)?;
        funding::apply_settlement(&mut self.position, &settlement);
        if settlement.shortfall > 0 {
            tracing::warn!(
                user = %self.position.owner,
                market = %self.position.market_id,
                payment = %settlement.payment,
                shortfall = settlement.shortfall,
                "funding payment exceeds posted collateral"
            );
        }
        Ok(settlement)
    }

    pub fn increase(
        &mut self,
        side: Side,
        size: u64,
        price: i64,
        leverage: Leverage,
    ) -> Result<OpenStep, EngineError> {
        let plan = crate::position::plan_increase(&self.position, side, size, price, leverage)?;
        tracing::debug!(
            base_size = plan.position.base_size,
            entry_price = plan.position.entry_price,
            required_margin = plan.required_margin,
            loss_cover = plan.loss_cover,
            margin_delta = %plan.margin_delta,
            "increase computed"
        );

        let available = self.account.free_collateral;
        if plan.margin_delta > available as i128 {
            return Err(EngineError::InsufficientCollateral {
                required: math::to_u64(plan.margin_delta)?,
                available,
            });
        }
        let free_after = math::checked_sub(available as i128, plan.margin_delta)?;
        self.account.free_collateral = math::to_u64(free_after)?;

        if plan.opened {
            self.account.open_position_count = self
                .account
                .open_position_count
                .checked_add(1)
                .ok_or(EngineError::TooManyPositions {
                    user: self.account.owner,
                })?;
        }
        self.market.open_interest = math::checked_add(self.market.open_interest, plan.notional_delta)?;
        self.position = plan.position;

        let health = position_health(&self.position, &self.market, price)?;
        if health.liquidatable {
            return Err(EngineError::UnhealthyAfterTrade {
                equity: health.equity,
                maintenance: health.maintenance_requirement,
            });
        }

        Ok(OpenStep {
            margin_delta: plan.margin_delta,
            opened: plan.opened,
        })
    }

    pub fn reduce(
        &mut self,
        close_amount: u64,
        price: i64,
        policy: ShortfallPolicy,
    ) -> Result<CloseStep, EngineError> {
        let plan = crate::position::plan_reduce(&self.position, close_amount, price)?;
        tracing::debug!(
            close_size = plan.close_size,
            realized_pnl = %plan.realized_pnl,
            released_margin = plan.released_margin,
            "reduce computed"
        );

        let mut step = CloseStep {
            close_size: plan.close_size,
            realized_pnl: plan.realized_pnl,
            closed: plan.closed,
            ..CloseStep::default()
        };

        if plan.settlement >= 0 {
            step.collateral_returned = math::to_u64(plan.settlement)?;
        } else {
            step.shortfall = math::to_u64(-plan.settlement)?;
            step.drawn_from_free = match policy {
                ShortfallPolicy::ProtocolAbsorbs => 0,
                ShortfallPolicy::DrawFromFreeCollateral => {
                    step.shortfall.min(self.account.free_collateral)
                }
            };
            step.bad_debt = step.shortfall - step.drawn_from_free;
        }

        self.account.free_collateral = self
            .account
            .free_collateral
            .checked_add(step.collateral_returned)
            .ok_or(math::MathError::Overflow)?
            - step.drawn_from_free;

        if plan.closed {
            self.account.open_position_count = self.account.open_position_count.saturating_sub(1);
        }
        self.market.open_interest = math::checked_sub(self.market.open_interest, plan.notional_delta)?;
        self.position = plan.position;

        Ok(step)
    }
}
