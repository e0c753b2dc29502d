// 9.0: audit trail. every committed engine call yields one TradeRecord; the host wraps it
// (and its own deposit/withdraw/funding changes) in an Event and hands it to a sink.

use crate::types::{MarketId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Open,
    Increase,
    Decrease,
    Close,
    /// Full close plus an opposite-side open of the residual in one call.
    Flip,
    Liquidation,
    FundingSettlement,
}

/// Structured result of one committed engine call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub kind: OperationKind,
    pub user: UserId,
    pub market: MarketId,
    /// Signed change of base size. positive = bought.
    pub size_delta: i64,
    pub price: i64,
    /// Net debit of free collateral. negative = credited back to the user.
    pub margin_delta: i128,
    pub realized_pnl: i128,
    /// Funding settled before the trade. positive = paid by the position.
    pub funding_paid: i128,
    pub open_interest: i128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Trade(TradeRecord),
    Deposit(CollateralEvent),
    Withdrawal(CollateralEvent),
    WithdrawalRejected(WithdrawalRejectedEvent),
    FundingRateUpdated(FundingRateEvent),
    // loss beyond posted margin, and how much of it the insurance fund paid
    BadDebt(BadDebtEvent),
    Liquidation(LiquidationEvent),
    InsuranceFunded(InsuranceEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralEvent {
    pub user: UserId,
    pub amount: u64,
    pub new_balance: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRejectedEvent {
    pub user: UserId,
    pub amount: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRateEvent {
    pub market: MarketId,
    pub funding_rate: i64,
    pub cumulative_funding: i128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BadDebtEvent {
    pub user: UserId,
    pub market: MarketId,
    pub amount: u64,
    pub covered: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub user: UserId,
    pub market: MarketId,
    pub liquidator: UserId,
    pub fee: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsuranceEvent {
    pub amount: u64,
    pub new_balance: u64,
}

pub trait EventSink {
    fn emit(&mut self, timestamp: Timestamp, payload: EventPayload) -> EventId;
}

/// In-memory sink that keeps the newest `max_events` entries.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<Event>,
    next_id: u64,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::new(),
            next_id: 1,
            max_events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    pub fn recent(&self, count: usize) -> impl Iterator<Item = &Event> {
        self.events.iter().skip(self.events.len().saturating_sub(count))
    }

    pub fn trades(&self) -> impl Iterator<Item = &TradeRecord> {
        self.events.iter().filter_map(|event| match &event.payload {
            EventPayload::Trade(record) => Some(record),
            _ => None,
        })
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.events.push_back(Event { id, timestamp, payload });
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit(amount: u64) -> EventPayload {
        EventPayload::Deposit(CollateralEvent {
            user: UserId(1),
            amount,
            new_balance: amount,
        })
    }

    #[test]
    fn ids_are_sequential() {
        let mut log = EventLog::new(10);
        let a = log.emit(Timestamp::from_secs(1), deposit(5));
        let b = log.emit(Timestamp::from_secs(2), deposit(6));
        assert_eq!(a, EventId(1));
        assert_eq!(b, EventId(2));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn oldest_events_are_dropped() {
        let mut log = EventLog::new(3);
        for amount in 1..=5 {
            log.emit(Timestamp::from_secs(0), deposit(amount));
        }
        assert_eq!(log.len(), 3);
        let ids: Vec<u64> = log.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(log.recent(1).next().map(|e| e.id.0), Some(5));
    }

    #[test]
    fn trades_filter() {
        let mut log = EventLog::new(10);
        log.emit(Timestamp::from_secs(0), deposit(1));
        log.emit(
            Timestamp::from_secs(0),
            EventPayload::Trade(TradeRecord {
                kind: OperationKind::Open,
                user: UserId(1),
                market: MarketId(2),
                size_delta: 10,
                price: 100,
                margin_delta: 500,
                realized_pnl: 0,
                funding_paid: 0,
                open_interest: 1_000,
            }),
        );
        let trades: Vec<_> = log.trades().collect();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].kind, OperationKind::Open);
    }

    #[test]
    fn record_serializes() {
        let record = TradeRecord {
            kind: OperationKind::Close,
            user: UserId(3),
            market: MarketId(1),
            size_delta: -15,
            price: 120_000,
            margin_delta: -580_005,
            realized_pnl: 250_005,
            funding_paid: 0,
            open_interest: 0,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"Close\""));
        let back: TradeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
