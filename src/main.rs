//! Margin engine simulation.
//!
//! Walks through the reference scenarios against the in-memory host:
//! open, increase, full and partial close, shorts, underwater closes,
//! flips, funding and liquidation. Pass a TOML settings path to override
//! the defaults. Balances print with two quote decimals.

use perps_margin::*;
use std::process::ExitCode;

const BTC: MarketId = MarketId(1);
const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const KEEPER: UserId = UserId(3);
const QUOTE_DECIMALS: u32 = 2;

fn main() -> ExitCode {
    let settings = match std::env::args().nth(1) {
        Some(path) => match Settings::load(&path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("failed to load {path}: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => Settings {
            markets: vec![MarketPreset::btc_perp()],
            ..Settings::default()
        },
    };
    settings.logging.init();

    println!("Perps Margin Engine Simulation");
    println!("Integer ticks, isolated positions, shared free collateral\n");

    let scenarios: [(&str, fn(&Settings) -> Result<(), ExchangeError>); 6] = [
        ("open, increase, close", scenario_1_long_lifecycle),
        ("short round trip", scenario_2_short),
        ("loss beyond margin", scenario_3_underwater_close),
        ("flip in one call", scenario_4_flip),
        ("funding", scenario_5_funding),
        ("liquidation", scenario_6_liquidation),
    ];

    for (name, run) in scenarios {
        println!("== {name} ==");
        if let Err(e) = run(&settings) {
            tracing::error!(scenario = name, error = %e, "scenario failed");
            return ExitCode::FAILURE;
        }
        println!();
    }

    println!("All simulations completed successfully.");
    ExitCode::SUCCESS
}

fn setup(settings: &Settings) -> Result<Exchange<StaticPriceResolver>, ExchangeError> {
    let mut exchange = Exchange::new(settings.engine.clone(), StaticPriceResolver::new());
    if let Some(age) = settings.oracle.max_price_age_secs {
        exchange = exchange.with_max_price_age(age);
    }
    exchange.set_time(SystemClock.now());
    for preset in &settings.markets {
        exchange.add_market(preset.market_id(), preset.params())?;
    }
    if exchange.market(BTC).is_none() {
        exchange.add_market(BTC, MarketPreset::btc_perp().params())?;
    }
    Ok(exchange)
}

fn set_price(exchange: &mut Exchange<StaticPriceResolver>, price: i64) -> Result<(), ExchangeError> {
    let now = exchange.time();
    exchange
        .prices_mut()
        .set_price(BTC, OraclePrice::new(price, now))?;
    println!("  oracle price -> {price}");
    Ok(())
}

fn quote(ticks: impl Into<i128>) -> String {
    let ticks = ticks.into();
    to_decimal(ticks, QUOTE_DECIMALS).map_or_else(|| ticks.to_string(), |d| d.to_string())
}

fn report(label: &str, outcome: &TradeOutcome) {
    let p = &outcome.position;
    println!(
        "  {label}: {:?} size={} entry={} collateral={} margin_delta={} pnl={} returned={} oi={}",
        outcome.record.kind,
        p.base_size,
        p.entry_price,
        p.collateral,
        outcome.margin_delta,
        outcome.realized_pnl,
        outcome.collateral_returned,
        outcome.record.open_interest,
    );
}

fn scenario_1_long_lifecycle(settings: &Settings) -> Result<(), ExchangeError> {
    let mut ex = setup(settings)?;
    ex.deposit(ALICE, 1_000_000)?;

    set_price(&mut ex, 100_000)?;
    let open = ex.open(ALICE, BTC, Side::Long, 10, 5)?;
    report("open 10 long @5x", &open);

    set_price(&mut ex, 110_000)?;
    let inc = ex.open(ALICE, BTC, Side::Long, 5, 5)?;
    report("add 5 long", &inc);

    set_price(&mut ex, 120_000)?;
    let close = ex.close(ALICE, BTC, CloseAmount::All)?;
    report("close all", &close);

    let free = ex.account(ALICE).map_or(0, |a| a.free_collateral);
    println!("  free collateral: {}", quote(free));
    Ok(())
}

fn scenario_2_short(settings: &Settings) -> Result<(), ExchangeError> {
    let mut ex = setup(settings)?;
    ex.deposit(BOB, 500_000)?;

    set_price(&mut ex, 100_000)?;
    report("open 10 short @5x", &ex.open(BOB, BTC, Side::Short, 10, 5)?);

    set_price(&mut ex, 110_000)?;
    report("close 4", &ex.close(BOB, BTC, CloseAmount::Size(4))?);
    report("close rest", &ex.close(BOB, BTC, CloseAmount::All)?);
    Ok(())
}

fn scenario_3_underwater_close(settings: &Settings) -> Result<(), ExchangeError> {
    let mut ex = setup(settings)?;
    ex.deposit(ALICE, 600_000)?;

    set_price(&mut ex, 110_000)?;
    report("open 10 long @2x", &ex.open(ALICE, BTC, Side::Long, 10, 2)?);

    set_price(&mut ex, 50_000)?;
    let close = ex.close(ALICE, BTC, CloseAmount::All)?;
    report("close all", &close);
    println!(
        "  shortfall={} bad_debt={} (policy {:?})",
        close.shortfall,
        close.bad_debt,
        ex.engine().config().shortfall_policy
    );
    Ok(())
}

fn scenario_4_flip(settings: &Settings) -> Result<(), ExchangeError> {
    let mut ex = setup(settings)?;
    ex.deposit(ALICE, 1_000_000)?;

    set_price(&mut ex, 100_000)?;
    report("open 10 long @5x", &ex.open(ALICE, BTC, Side::Long, 10, 5)?);

    set_price(&mut ex, 105_000)?;
    report("sell 25", &ex.open(ALICE, BTC, Side::Short, 25, 5)?);
    Ok(())
}

fn scenario_5_funding(settings: &Settings) -> Result<(), ExchangeError> {
    let mut ex = setup(settings)?;
    ex.deposit(ALICE, 1_000_000)?;
    ex.deposit(BOB, 1_000_000)?;

    set_price(&mut ex, 100_000)?;
    ex.open(ALICE, BTC, Side::Long, 10, 5)?;
    ex.open(BOB, BTC, Side::Short, 10, 5)?;

    let interval = ex.market(BTC).map_or(0, |m| m.params.funding_interval_secs);
    ex.advance_time(interval);
    let rate = ex.set_funding_rate(BTC, 5)?;
    println!("  funding rate set to {rate} per base unit per second");

    ex.advance_time(600);
    for user in [ALICE, BOB] {
        let out = ex.settle_funding(user, BTC)?;
        println!(
            "  {user}: paid {} -> collateral {}",
            out.settlement.payment, out.settlement.new_collateral
        );
    }
    Ok(())
}

fn scenario_6_liquidation(settings: &Settings) -> Result<(), ExchangeError> {
    let mut ex = setup(settings)?;
    ex.deposit(ALICE, 200_000)?;
    ex.fund_insurance(10_000)?;

    set_price(&mut ex, 100_000)?;
    report("open 10 long @10x", &ex.open(ALICE, BTC, Side::Long, 10, 10)?);

    for price in [97_000, 95_000, 94_000] {
        set_price(&mut ex, price)?;
        let health = ex.health(ALICE, BTC)?;
        let ratio = health
            .margin_ratio
            .map_or_else(|| "n/a".to_string(), |r| r.round_dp(4).to_string());
        println!(
            "  equity={} maintenance={} ratio={} liquidatable={}",
            health.equity, health.maintenance_requirement, ratio, health.liquidatable
        );
    }

    for (user, market) in ex.liquidatable_positions() {
        let out = ex.liquidate(user, market, KEEPER)?;
        report("liquidated", &out.trade);
        println!("  liquidation fee {} paid to {KEEPER}", quote(out.fee));
    }
    let keeper = ex.account(KEEPER).map_or(0, |a| a.free_collateral);
    println!("  keeper balance: {}", quote(keeper));
    println!("  insurance fund: {}", quote(ex.insurance_fund().balance));
    println!("  protocol bad debt: {}", quote(ex.bad_debt() as i128));
    println!("  events recorded: {}", ex.events().len());
    Ok(())
}
