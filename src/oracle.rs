// 4.0: oracle input. the engine never fetches prices, it is handed an already resolved
// OraclePrice. resolvers and the staleness guard are the seams a host plugs into.

use crate::types::{MarketId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OraclePrice {
    pub price: i64,
    pub published_at: Timestamp,
}

impl OraclePrice {
    pub fn new(price: i64, published_at: Timestamp) -> Self {
        Self { price, published_at }
    }

    pub fn validate(&self) -> Result<(), OracleError> {
        if self.price <= 0 {
            return Err(OracleError::InvalidPrice(self.price));
        }
        Ok(())
    }

    pub fn age_at(&self, now: Timestamp) -> i64 {
        self.published_at.seconds_until(now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("price must be positive, got {0}")]
    InvalidPrice(i64),

    #[error("price is {age}s old, max allowed {max_age}s")]
    StalePrice { age: i64, max_age: i64 },

    #[error("no price available for {0}")]
    Unavailable(MarketId),
}

// 4.1: clocks. wall time for production, a shared settable clock for simulations and tests.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self(Arc::new(AtomicI64::new(start.as_secs())))
    }

    pub fn set(&self, timestamp: Timestamp) {
        self.0.store(timestamp.as_secs(), Ordering::SeqCst);
    }

    /// Moves the clock by `secs`, saturating at the ends of the i64 range.
    pub fn advance(&self, secs: i64) {
        // the closure never returns None, so the update cannot fail
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| Some(now.saturating_add(secs)));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_secs(self.0.load(Ordering::SeqCst))
    }
}

// 4.2: injected precondition. runs before any price is used.
pub trait PriceGuard: fmt::Debug + Send + Sync {
    fn check(&self, price: &OraclePrice) -> Result<(), OracleError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl PriceGuard for AcceptAll {
    fn check(&self, _price: &OraclePrice) -> Result<(), OracleError> {
        Ok(())
    }
}

/// Rejects prices published more than `max_age_secs` before the clock's now.
#[derive(Debug)]
pub struct MaxPriceAge<C: Clock> {
    pub max_age_secs: i64,
    pub clock: C,
}

impl<C: Clock> MaxPriceAge<C> {
    pub fn new(max_age_secs: i64, clock: C) -> Self {
        Self { max_age_secs, clock }
    }
}

impl<C: Clock> PriceGuard for MaxPriceAge<C> {
    fn check(&self, price: &OraclePrice) -> Result<(), OracleError> {
        let age = price.age_at(self.clock.now());
        if age > self.max_age_secs {
            return Err(OracleError::StalePrice {
                age,
                max_age: self.max_age_secs,
            });
        }
        Ok(())
    }
}

// 4.3: the price-feed collaborator. returns the current integer price for a market's index.
pub trait PriceResolver {
    fn resolve(&self, market_id: MarketId) -> Result<OraclePrice, OracleError>;
}

/// Prices pushed by an admin or a test. mirrors a push oracle account.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceResolver {
    prices: HashMap<MarketId, OraclePrice>,
}

impl StaticPriceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&mut self, market_id: MarketId, price: OraclePrice) -> Result<(), OracleError> {
        price.validate()?;
        self.prices.insert(market_id, price);
        Ok(())
    }
}

impl PriceResolver for StaticPriceResolver {
    fn resolve(&self, market_id: MarketId) -> Result<OraclePrice, OracleError> {
        self.prices
            .get(&market_id)
            .copied()
            .ok_or(OracleError::Unavailable(market_id))
    }
}
