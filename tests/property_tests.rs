//! Property-based tests for the margin math.
//!
//! These tests verify invariants hold under random inputs.

use perps_margin::*;
use proptest::prelude::*;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = i64> {
    1i64..10_000_000i64
}

fn size_strategy() -> impl Strategy<Value = u64> {
    1u64..1_000_000u64
}

fn leverage_strategy() -> impl Strategy<Value = u16> {
    1u16..=50u16
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Long), Just(Side::Short)]
}

struct Book {
    engine: PositionEngine,
    market: Market,
    account: UserAccount,
    position: Position,
}

impl Book {
    fn funded(free: u64) -> Self {
        let params = MarketParams {
            max_leverage: 50,
            maintenance_margin_bps: 200,
            ..MarketParams::default()
        };
        let mut account = UserAccount::new(UserId(7));
        account.deposit(free).unwrap();
        Self {
            engine: PositionEngine::default(),
            market: Market::new(MarketId(3), params, Timestamp::from_secs(0)).unwrap(),
            account,
            position: Position::empty(UserId(7), MarketId(3)),
        }
    }

    fn open(&mut self, side: Side, size: u64, leverage: u16, price: i64) -> Result<TradeOutcome, EngineError> {
        self.engine.open_or_increase(
            TradeAccounts::new(&mut self.market, &mut self.account, &mut self.position),
            &OraclePrice::new(price, Timestamp::from_secs(0)),
            side,
            size,
            leverage,
        )
    }

    fn close(&mut self, amount: CloseAmount, price: i64) -> Result<TradeOutcome, EngineError> {
        self.engine.decrease_or_close(
            TradeAccounts::new(&mut self.market, &mut self.account, &mut self.position),
            &OraclePrice::new(price, Timestamp::from_secs(0)),
            amount,
        )
    }
}

const RICH: u64 = u64::MAX / 2;

proptest! {
    /// Required margin strictly grows with size at fixed leverage and price.
    #[test]
    fn margin_monotonic_in_size(
        size in size_strategy(),
        extra in 1u64..1_000u64,
        price in price_strategy(),
        leverage in leverage_strategy(),
    ) {
        let lev = Leverage::new(leverage).unwrap();
        let empty = Position::empty(UserId(1), MarketId(1));
        let small = position::plan_increase(&empty, Side::Long, size, price, lev).unwrap();
        let large = position::plan_increase(&empty, Side::Long, size + extra, price, lev).unwrap();
        // a strict increase needs the notional step to be at least one leverage unit
        if (extra as u128) * (price as u128) >= leverage as u128 {
            prop_assert!(large.required_margin > small.required_margin);
        } else {
            prop_assert!(large.required_margin >= small.required_margin);
        }
    }

    /// Required margin never under-collects: margin * leverage >= notional.
    #[test]
    fn margin_covers_notional(
        size in size_strategy(),
        price in price_strategy(),
        leverage in leverage_strategy(),
    ) {
        let lev = Leverage::new(leverage).unwrap();
        let empty = Position::empty(UserId(1), MarketId(1));
        let plan = position::plan_increase(&empty, Side::Short, size, price, lev).unwrap();
        let notional = size as u128 * price as u128;
        prop_assert!(plan.required_margin as u128 * leverage as u128 >= notional);
        prop_assert!((plan.required_margin as u128 - 1) * (leverage as u128) < notional);
    }

    /// Open then close at the same price returns exactly the posted margin.
    #[test]
    fn round_trip_returns_margin(
        side in side_strategy(),
        size in size_strategy(),
        price in price_strategy(),
        leverage in leverage_strategy(),
    ) {
        let mut book = Book::funded(RICH);
        let open = book.open(side, size, leverage, price).unwrap();
        let close = book.close(CloseAmount::All, price).unwrap();

        prop_assert_eq!(close.realized_pnl, 0);
        prop_assert_eq!(close.collateral_returned as i128, open.margin_delta);
        prop_assert_eq!(book.account.free_collateral, RICH);
        prop_assert_eq!(book.market.open_interest, 0);
        prop_assert!(book.position.is_empty());
    }

    /// Long and short of equal size realize opposite pnl for the same move.
    #[test]
    fn pnl_sign_symmetry(
        size in size_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
    ) {
        let mut long = Book::funded(RICH);
        let mut short = Book::funded(RICH);
        long.open(Side::Long, size, 1, entry).unwrap();
        short.open(Side::Short, size, 1, entry).unwrap();

        let long_pnl = long.close(CloseAmount::All, exit).unwrap().realized_pnl;
        let short_pnl = short.close(CloseAmount::All, exit).unwrap().realized_pnl;
        prop_assert_eq!(long_pnl, -short_pnl);
        prop_assert_eq!(long_pnl > 0, exit > entry);
    }

    /// The weighted entry lies between the old entry and the execution price.
    #[test]
    fn weighted_entry_bounded(
        side in side_strategy(),
        first in size_strategy(),
        second in size_strategy(),
        p1 in price_strategy(),
        p2 in price_strategy(),
    ) {
        let mut book = Book::funded(RICH);
        book.open(side, first, 50, p1).unwrap();
        book.open(side, second, 50, p2).unwrap();

        let entry = book.position.entry_price;
        prop_assert!(entry >= p1.min(p2));
        prop_assert!(entry <= p1.max(p2));
    }

    /// Returned collateral is never negative, however large the loss.
    #[test]
    fn collateral_floor(
        side in side_strategy(),
        size in size_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
        leverage in leverage_strategy(),
    ) {
        let mut book = Book::funded(RICH);
        let open = book.open(side, size, leverage, entry).unwrap();
        let close = book.close(CloseAmount::All, exit).unwrap();

        let gross = open.margin_delta + close.realized_pnl;
        prop_assert_eq!(close.collateral_returned as i128, gross.max(0));
        prop_assert_eq!(close.shortfall as i128, (-gross).max(0));
        prop_assert_eq!(book.account.free_collateral as i128, RICH as i128 - open.margin_delta + close.collateral_returned as i128);
    }

    /// Partial closes release margin pro rata and never leave a non-empty
    /// position without an entry price.
    #[test]
    fn partial_close_keeps_record_consistent(
        side in side_strategy(),
        size in 2u64..100_000u64,
        cut in 1u64..100_000u64,
        price in price_strategy(),
        exit in price_strategy(),
        leverage in leverage_strategy(),
    ) {
        let mut book = Book::funded(RICH);
        book.open(side, size, leverage, price).unwrap();
        let before = book.position.collateral;

        let out = book.close(CloseAmount::Size(cut), exit).unwrap();
        let closed = cut.min(size);
        let released = before as u128 * closed as u128 / size as u128;

        prop_assert_eq!(book.position.collateral as u128, before as u128 - released);
        prop_assert_eq!(book.position.size(), size - closed);
        prop_assert!(book.position.is_consistent());
        prop_assert_eq!(out.record.kind == OperationKind::Close, closed == size);
        prop_assert_eq!(book.account.open_position_count, u8::from(closed < size));
    }

    /// A flip leaves exactly the residual on the requested side at the flip price.
    #[test]
    fn flip_leaves_residual(
        side in side_strategy(),
        size in size_strategy(),
        residual in size_strategy(),
        p1 in price_strategy(),
        p2 in price_strategy(),
    ) {
        let mut book = Book::funded(RICH);
        book.open(side, size, 10, p1).unwrap();
        let out = book.open(side.opposite(), size + residual, 10, p2).unwrap();

        prop_assert_eq!(out.record.kind, OperationKind::Flip);
        prop_assert_eq!(book.position.side(), Some(side.opposite()));
        prop_assert_eq!(book.position.size(), residual);
        prop_assert_eq!(book.position.entry_price, p2);
        prop_assert_eq!(book.account.open_position_count, 1);
    }

    /// Wide mul_div agrees with native arithmetic whenever the product fits.
    #[test]
    fn mul_div_matches_native(
        a in 0u128..u64::MAX as u128,
        b in 0u128..u64::MAX as u128,
        d in 1u128..u64::MAX as u128,
    ) {
        let floor = math::mul_div(a, b, d, Rounding::Floor).unwrap();
        let ceil = math::mul_div(a, b, d, Rounding::Ceil).unwrap();
        prop_assert_eq!(floor, a * b / d);
        prop_assert_eq!(ceil, (a * b).div_ceil(d));
    }

    /// Signed floor and ceil straddle the true quotient.
    #[test]
    fn signed_rounding_brackets(
        a in -1_000_000_000i128..1_000_000_000i128,
        d in prop_oneof![-1_000i128..-1i128, 1i128..1_000i128],
    ) {
        let floor = math::floor_div(a, d).unwrap();
        let ceil = math::ceil_div(a, d).unwrap();
        prop_assert!(floor <= ceil);
        prop_assert!(ceil - floor <= 1);
        prop_assert!(floor * d <= a || d < 0);
        prop_assert_eq!(floor == ceil, a % d == 0);
    }
}
