// 10.0: in-memory host around the engine. owns the keyed stores, the clock, the
// price resolver, the insurance fund and the event log. every call works on copies of the three records
// it touches and writes them back only when the engine commits.

use crate::account::{AccountError, UserAccount};
use crate::engine::{
    CloseAmount, EngineConfig, EngineError, FundingOutcome, LiquidationOutcome, PositionEngine,
    PositionHealth, TradeAccounts, TradeOutcome,
};
use crate::events::{
    BadDebtEvent, CollateralEvent, EventLog, EventPayload, EventSink, FundingRateEvent,
    InsuranceEvent, LiquidationEvent, WithdrawalRejectedEvent,
};
use crate::funding;
use crate::insurance::InsuranceFund;
use crate::market::{Market, MarketError, MarketParams};
use crate::math::MathError;
use crate::oracle::{Clock, ManualClock, MaxPriceAge, OracleError, PriceResolver};
use crate::position::Position;
use crate::types::{MarketId, Side, Timestamp, UserId};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("{0} not found")]
    MarketNotFound(MarketId),

    #[error("{0} already exists")]
    MarketExists(MarketId),

    #[error("{0} not found")]
    AccountNotFound(UserId),

    #[error("{0} cannot liquidate its own position")]
    SelfLiquidation(UserId),

    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    #[error("account: {0}")]
    Account(#[from] AccountError),

    #[error("market: {0}")]
    Market(#[from] MarketError),

    #[error("oracle: {0}")]
    Oracle(#[from] OracleError),

    #[error("arithmetic: {0}")]
    Arithmetic(#[from] MathError),
}

/** 10.1: all host state lives here */
#[derive(Debug)]
pub struct Exchange<R: PriceResolver> {
    engine: PositionEngine,
    prices: R,
    clock: ManualClock,
    markets: HashMap<MarketId, Market>,
    accounts: HashMap<UserId, UserAccount>,
    positions: HashMap<(UserId, MarketId), Position>,
    events: EventLog,
    insurance: InsuranceFund,
    /// Bad debt the insurance fund could not cover.
    bad_debt: u128,
}

// copies of the three records after a successful engine call, not yet written back
struct Staged<T> {
    market: Market,
    account: UserAccount,
    position: Position,
    value: T,
}

impl<R: PriceResolver> Exchange<R> {
    pub fn new(config: EngineConfig, prices: R) -> Self {
        let events = EventLog::new(config.max_events);
        Self {
            engine: PositionEngine::new(config),
            prices,
            clock: ManualClock::new(Timestamp::from_secs(0)),
            markets: HashMap::new(),
            accounts: HashMap::new(),
            positions: HashMap::new(),
            events,
            insurance: InsuranceFund::new(0),
            bad_debt: 0,
        }
    }

    /// Reject prices older than `max_age_secs` relative to the host clock.
    pub fn with_max_price_age(mut self, max_age_secs: i64) -> Self {
        let guard = MaxPriceAge::new(max_age_secs, self.clock.clone());
        self.engine = PositionEngine::new(self.engine.config().clone()).with_price_guard(guard);
        self
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.clock.set(timestamp);
    }

    pub fn time(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn advance_time(&mut self, secs: i64) {
        self.clock.advance(secs);
    }

    pub fn prices(&self) -> &R {
        &self.prices
    }

    pub fn prices_mut(&mut self) -> &mut R {
        &mut self.prices
    }

    pub fn engine(&self) -> &PositionEngine {
        &self.engine
    }

    // ---- markets ----

    pub fn add_market(&mut self, id: MarketId, params: MarketParams) -> Result<(), ExchangeError> {
        if self.markets.contains_key(&id) {
            return Err(ExchangeError::MarketExists(id));
        }
        let market = Market::new(id, params, self.time())?;
        tracing::info!(market = %id, max_leverage = market.params.max_leverage, "market created");
        self.markets.insert(id, market);
        Ok(())
    }

    pub fn market(&self, id: MarketId) -> Option<&Market> {
        self.markets.get(&id)
    }

    pub fn markets(&self) -> impl Iterator<Item = &Market> {
        self.markets.values()
    }

    pub fn set_funding_rate(&mut self, id: MarketId, rate: i64) -> Result<i64, ExchangeError> {
        let now = self.time();
        let market = self
            .markets
            .get_mut(&id)
            .ok_or(ExchangeError::MarketNotFound(id))?;
        let stored = funding::set_funding_rate(market, rate, now)?;
        let cumulative_funding = market.cumulative_funding;

        self.events.emit(
            now,
            EventPayload::FundingRateUpdated(FundingRateEvent {
                market: id,
                funding_rate: stored,
                cumulative_funding,
            }),
        );
        Ok(stored)
    }

    // ---- accounts ----

    pub fn open_account(&mut self, user: UserId) -> &UserAccount {
        self.accounts
            .entry(user)
            .or_insert_with(|| UserAccount::new(user))
    }

    pub fn account(&self, user: UserId) -> Option<&UserAccount> {
        self.accounts.get(&user)
    }

    pub fn position(&self, user: UserId, market: MarketId) -> Option<&Position> {
        self.positions.get(&(user, market))
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Credit collateral already received by the custody vault. Opens the account if needed.
    pub fn deposit(&mut self, user: UserId, amount: u64) -> Result<u64, ExchangeError> {
        let account = self
            .accounts
            .entry(user)
            .or_insert_with(|| UserAccount::new(user));
        let new_balance = account.deposit(amount)?;

        self.events.emit(
            self.clock.now(),
            EventPayload::Deposit(CollateralEvent {
                user,
                amount,
                new_balance,
            }),
        );
        Ok(new_balance)
    }

    // blocked while positions are open
    pub fn withdraw(&mut self, user: UserId, amount: u64) -> Result<u64, ExchangeError> {
        let now = self.time();
        let account = self
            .accounts
            .get_mut(&user)
            .ok_or(ExchangeError::AccountNotFound(user))?;

        match account.withdraw(amount) {
            Ok(new_balance) => {
                self.events.emit(
                    now,
                    EventPayload::Withdrawal(CollateralEvent {
                        user,
                        amount,
                        new_balance,
                    }),
                );
                Ok(new_balance)
            }
            Err(e) => {
                tracing::warn!(user = %user, amount, error = %e, "withdrawal rejected");
                self.events.emit(
                    now,
                    EventPayload::WithdrawalRejected(WithdrawalRejectedEvent {
                        user,
                        amount,
                        reason: e.to_string(),
                    }),
                );
                Err(e.into())
            }
        }
    }

    // ---- trading ----

    pub fn open(
        &mut self,
        user: UserId,
        market: MarketId,
        side: Side,
        size: u64,
        leverage: u16,
    ) -> Result<TradeOutcome, ExchangeError> {
        let price = self.prices.resolve(market)?;
        let outcome = self.run(user, market, |engine, accounts| {
            engine.open_or_increase(accounts, &price, side, size, leverage)
        })?;
        self.record_trade(&outcome);
        Ok(outcome)
    }

    pub fn close(
        &mut self,
        user: UserId,
        market: MarketId,
        amount: CloseAmount,
    ) -> Result<TradeOutcome, ExchangeError> {
        let price = self.prices.resolve(market)?;
        let outcome = self.run(user, market, |engine, accounts| {
            engine.decrease_or_close(accounts, &price, amount)
        })?;
        self.record_trade(&outcome);
        Ok(outcome)
    }

    /// Force-close an unhealthy position. The liquidation fee is credited to the
    /// liquidator's free collateral, opening its account if needed.
    pub fn liquidate(
        &mut self,
        user: UserId,
        market: MarketId,
        liquidator: UserId,
    ) -> Result<LiquidationOutcome, ExchangeError> {
        if liquidator == user {
            return Err(ExchangeError::SelfLiquidation(user));
        }
        let price = self.prices.resolve(market)?;
        let staged = self.stage(user, market, |engine, accounts| engine.liquidate(accounts, &price))?;

        let mut keeper = self
            .accounts
            .get(&liquidator)
            .cloned()
            .unwrap_or_else(|| UserAccount::new(liquidator));
        let fee = staged.value.fee;
        if fee > 0 {
            keeper.deposit(fee)?;
        }

        let outcome = self.commit(staged);
        self.accounts.insert(liquidator, keeper);
        self.record_trade(&outcome.trade);
        self.events.emit(
            self.clock.now(),
            EventPayload::Liquidation(LiquidationEvent {
                user,
                market,
                liquidator,
                fee,
            }),
        );
        Ok(outcome)
    }

    pub fn settle_funding(&mut self, user: UserId, market: MarketId) -> Result<FundingOutcome, ExchangeError> {
        let outcome = self.run(user, market, |engine, accounts| engine.settle_funding(accounts))?;
        let now = self.time();
        if outcome.settlement.shortfall > 0 {
            self.note_bad_debt(now, user, market, outcome.settlement.shortfall);
        }
        self.events.emit(now, EventPayload::Trade(outcome.record.clone()));
        Ok(outcome)
    }

    /// Health at the resolver's current price, funding accrued to the host clock.
    pub fn health(&self, user: UserId, market: MarketId) -> Result<PositionHealth, ExchangeError> {
        let price = self.prices.resolve(market)?;
        let (market, position) = self.accrued_view(user, market)?;
        Ok(self.engine.health(&position, &market, &price)?)
    }

    pub fn is_liquidatable(&self, user: UserId, market: MarketId) -> Result<bool, ExchangeError> {
        let price = self.prices.resolve(market)?;
        let (market, position) = self.accrued_view(user, market)?;
        Ok(self.engine.is_liquidatable(&position, &market, &price)?)
    }

    /// Every open position whose equity is below maintenance at the current price.
    pub fn liquidatable_positions(&self) -> Vec<(UserId, MarketId)> {
        let mut found: Vec<(UserId, MarketId)> = self
            .positions
            .iter()
            .filter(|(_, position)| !position.is_empty())
            .filter(|((user, market), _)| matches!(self.is_liquidatable(*user, *market), Ok(true)))
            .map(|(key, _)| *key)
            .collect();
        found.sort();
        found
    }

    // ---- reporting ----

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Loss nobody paid: beyond-margin close losses and uncovered funding,
    /// after the insurance fund has paid what it could.
    pub fn bad_debt(&self) -> u128 {
        self.bad_debt
    }

    pub fn insurance_fund(&self) -> &InsuranceFund {
        &self.insurance
    }

    pub fn fund_insurance(&mut self, amount: u64) -> Result<u64, ExchangeError> {
        let new_balance = self.insurance.deposit(amount)?;
        tracing::info!(amount, balance = new_balance, "insurance fund topped up");
        self.events.emit(
            self.clock.now(),
            EventPayload::InsuranceFunded(InsuranceEvent { amount, new_balance }),
        );
        Ok(new_balance)
    }

    /// Free collateral plus collateral posted to positions, across all users.
    pub fn total_collateral(&self) -> u128 {
        let free: u128 = self.accounts.values().map(|a| a.free_collateral as u128).sum();
        let posted: u128 = self.positions.values().map(|p| p.collateral as u128).sum();
        free + posted
    }

    /// Everything the host holds: user collateral plus the insurance fund.
    pub fn total_value(&self) -> u128 {
        self.total_collateral() + self.insurance.balance as u128
    }

    fn accrued_view(&self, user: UserId, market_id: MarketId) -> Result<(Market, Position), ExchangeError> {
        let mut market = self
            .markets
            .get(&market_id)
            .cloned()
            .ok_or(ExchangeError::MarketNotFound(market_id))?;
        funding::accrue(&mut market, self.time())?;
        let position = self
            .positions
            .get(&(user, market_id))
            .cloned()
            .unwrap_or_else(|| Position::empty(user, market_id));
        Ok((market, position))
    }

    fn run<T>(
        &mut self,
        user: UserId,
        market_id: MarketId,
        op: impl FnOnce(&PositionEngine, TradeAccounts<'_>) -> Result<T, EngineError>,
    ) -> Result<T, ExchangeError> {
        let staged = self.stage(user, market_id, op)?;
        Ok(self.commit(staged))
    }

    // 10.2: load copies, accrue funding to now, run. nothing is written here.
    fn stage<T>(
        &self,
        user: UserId,
        market_id: MarketId,
        op: impl FnOnce(&PositionEngine, TradeAccounts<'_>) -> Result<T, EngineError>,
    ) -> Result<Staged<T>, ExchangeError> {
        let mut market = self
            .markets
            .get(&market_id)
            .cloned()
            .ok_or(ExchangeError::MarketNotFound(market_id))?;
        let mut account = self
            .accounts
            .get(&user)
            .cloned()
            .ok_or(ExchangeError::AccountNotFound(user))?;
        let mut position = self
            .positions
            .get(&(user, market_id))
            .cloned()
            .unwrap_or_else(|| Position::empty(user, market_id));

        funding::accrue(&mut market, self.time())?;

        let result = op(
            &self.engine,
            TradeAccounts::new(&mut market, &mut account, &mut position),
        );
        match result {
            Ok(value) => Ok(Staged {
                market,
                account,
                position,
                value,
            }),
            Err(e) => {
                tracing::warn!(user = %user, market = %market_id, error = %e, "call rejected");
                Err(e.into())
            }
        }
    }

    // 10.3: write back. positions are created here on first success and never removed.
    fn commit<T>(&mut self, staged: Staged<T>) -> T {
        let key = (staged.account.owner, staged.market.id);
        self.markets.insert(staged.market.id, staged.market);
        self.accounts.insert(staged.account.owner, staged.account);
        self.positions.insert(key, staged.position);
        staged.value
    }

    fn record_trade(&mut self, outcome: &TradeOutcome) {
        let now = self.time();
        if outcome.bad_debt > 0 {
            self.note_bad_debt(now, outcome.record.user, outcome.record.market, outcome.bad_debt);
        }
        self.events.emit(now, EventPayload::Trade(outcome.record.clone()));
    }

    // the insurance fund pays first; only the rest is counted as bad debt
    fn note_bad_debt(&mut self, now: Timestamp, user: UserId, market: MarketId, amount: u64) {
        let covered = self.insurance.cover_bad_debt(amount);
        let uncovered = amount - covered;
        self.bad_debt += uncovered as u128;
        if uncovered > 0 {
            tracing::warn!(
                user = %user,
                market = %market,
                amount,
                covered,
                fund_balance = self.insurance.balance,
                "insurance fund exhausted"
            );
        }
        self.events.emit(
            now,
            EventPayload::BadDebt(BadDebtEvent {
                user,
                market,
                amount,
                covered,
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{OraclePrice, StaticPriceResolver};

    const BTC: MarketId = MarketId(1);
    const ALICE: UserId = UserId(1);
    const KEEPER: UserId = UserId(2);

    fn exchange() -> Exchange<StaticPriceResolver> {
        let mut ex = Exchange::new(EngineConfig::default(), StaticPriceResolver::new());
        ex.add_market(BTC, MarketParams::default()).unwrap();
        ex.deposit(ALICE, 1_000_000).unwrap();
        ex
    }

    fn set_price(ex: &mut Exchange<StaticPriceResolver>, price: i64) {
        let now = ex.time();
        ex.prices_mut()
            .set_price(BTC, OraclePrice::new(price, now))
            .unwrap();
    }

    #[test]
    fn open_and_close_round_trip() {
        let mut ex = exchange();
        set_price(&mut ex, 100_000);
        ex.open(ALICE, BTC, Side::Long, 10, 5).unwrap();
        assert_eq!(ex.account(ALICE).unwrap().free_collateral, 800_000);

        let out = ex.close(ALICE, BTC, CloseAmount::All).unwrap();
        assert_eq!(out.collateral_returned, 200_000);
        assert_eq!(ex.account(ALICE).unwrap().free_collateral, 1_000_000);
        // zeroed, not removed
        assert!(ex.position(ALICE, BTC).unwrap().is_empty());
        assert_eq!(ex.events().trades().count(), 2);
    }

    #[test]
    fn failed_first_open_creates_nothing() {
        let mut ex = exchange();
        set_price(&mut ex, 100_000);
        let err = ex.open(ALICE, BTC, Side::Long, 1_000, 1).unwrap_err();
        assert!(matches!(
            err,
            ExchangeError::Engine(EngineError::InsufficientCollateral { .. })
        ));
        assert!(ex.position(ALICE, BTC).is_none());
        assert_eq!(ex.account(ALICE).unwrap().free_collateral, 1_000_000);
    }

    #[test]
    fn missing_records() {
        let mut ex = exchange();
        set_price(&mut ex, 100);
        assert_eq!(
            ex.open(UserId(9), BTC, Side::Long, 1, 1).unwrap_err(),
            ExchangeError::AccountNotFound(UserId(9))
        );
        assert_eq!(
            ex.open(ALICE, MarketId(9), Side::Long, 1, 1).unwrap_err(),
            ExchangeError::Oracle(OracleError::Unavailable(MarketId(9)))
        );
        assert_eq!(
            ex.add_market(BTC, MarketParams::default()).unwrap_err(),
            ExchangeError::MarketExists(BTC)
        );
    }

    #[test]
    fn withdraw_blocked_while_open() {
        let mut ex = exchange();
        set_price(&mut ex, 100_000);
        ex.open(ALICE, BTC, Side::Short, 1, 10).unwrap();
        assert_eq!(
            ex.withdraw(ALICE, 1).unwrap_err(),
            ExchangeError::Account(AccountError::PositionsOpen(1))
        );
        ex.close(ALICE, BTC, CloseAmount::All).unwrap();
        assert_eq!(ex.withdraw(ALICE, 1_000_000).unwrap(), 0);
    }

    #[test]
    fn funding_accrues_to_host_clock() {
        let mut ex = exchange();
        set_price(&mut ex, 100_000);
        ex.set_time(Timestamp::from_secs(3_600));
        assert_eq!(ex.set_funding_rate(BTC, 2).unwrap(), 2);
        ex.open(ALICE, BTC, Side::Long, 10, 5).unwrap();

        ex.advance_time(50);
        let out = ex.settle_funding(ALICE, BTC).unwrap();
        // 10 * 2 * 50
        assert_eq!(out.settlement.payment, 1_000);
        assert_eq!(ex.position(ALICE, BTC).unwrap().collateral, 199_000);
        assert_eq!(ex.market(BTC).unwrap().cumulative_funding, 100);
    }

    #[test]
    fn stale_price_rejected() {
        let mut ex = exchange().with_max_price_age(60);
        set_price(&mut ex, 100_000);
        ex.advance_time(61);
        let err = ex.open(ALICE, BTC, Side::Long, 1, 1).unwrap_err();
        assert_eq!(
            err,
            ExchangeError::Engine(EngineError::Oracle(OracleError::StalePrice {
                age: 61,
                max_age: 60
            }))
        );
    }

    #[test]
    fn liquidation_scan_and_bad_debt() {
        let mut ex = exchange();
        set_price(&mut ex, 100_000);
        ex.open(ALICE, BTC, Side::Long, 10, 10).unwrap();
        assert!(ex.liquidatable_positions().is_empty());

        set_price(&mut ex, 85_000);
        assert_eq!(ex.liquidatable_positions(), vec![(ALICE, BTC)]);
        let health = ex.health(ALICE, BTC).unwrap();
        assert_eq!(health.equity, -50_000);

        let out = ex.liquidate(ALICE, BTC, KEEPER).unwrap();
        assert_eq!(out.trade.bad_debt, 50_000);
        assert_eq!(ex.bad_debt(), 50_000);
        assert!(ex.liquidatable_positions().is_empty());
    }

    #[test]
    fn liquidation_fee_paid_to_liquidator() {
        let mut ex = exchange();
        set_price(&mut ex, 100_000);
        ex.open(ALICE, BTC, Side::Long, 10, 10).unwrap();
        set_price(&mut ex, 94_000);
        let before = ex.total_value();

        assert_eq!(
            ex.liquidate(ALICE, BTC, ALICE).unwrap_err(),
            ExchangeError::SelfLiquidation(ALICE)
        );

        let out = ex.liquidate(ALICE, BTC, KEEPER).unwrap();
        assert_eq!(out.fee, 23_500);
        assert_eq!(ex.account(KEEPER).unwrap().free_collateral, 23_500);
        assert_eq!(ex.account(ALICE).unwrap().free_collateral, 900_000 + 16_500);
        // only the realized loss left the system
        assert_eq!(ex.total_value() as i128, before as i128 + out.trade.realized_pnl);
    }

    #[test]
    fn insurance_fund_covers_bad_debt_first() {
        let mut ex = exchange();
        ex.fund_insurance(30_000).unwrap();
        set_price(&mut ex, 100_000);
        ex.open(ALICE, BTC, Side::Long, 10, 10).unwrap();

        set_price(&mut ex, 85_000);
        let out = ex.liquidate(ALICE, BTC, KEEPER).unwrap();
        assert_eq!(out.trade.bad_debt, 50_000);
        assert_eq!(ex.insurance_fund().balance, 0);
        assert_eq!(ex.insurance_fund().total_payouts, 30_000);
        assert_eq!(ex.bad_debt(), 20_000);
        assert!(ex.events().iter().any(|e| matches!(
            &e.payload,
            EventPayload::BadDebt(BadDebtEvent { amount: 50_000, covered: 30_000, .. })
        )));
    }

    #[test]
    fn health_applies_price_guard() {
        let mut ex = exchange().with_max_price_age(60);
        set_price(&mut ex, 100_000);
        ex.open(ALICE, BTC, Side::Long, 1, 1).unwrap();
        ex.advance_time(61);
        let stale = ExchangeError::Engine(EngineError::Oracle(OracleError::StalePrice {
            age: 61,
            max_age: 60,
        }));
        assert_eq!(ex.health(ALICE, BTC).unwrap_err(), stale);
        assert_eq!(ex.is_liquidatable(ALICE, BTC).unwrap_err(), stale);
    }
}
