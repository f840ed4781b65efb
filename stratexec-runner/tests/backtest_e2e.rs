//! End-to-end backtests: synthetic bars through the replay session.

use stratexec_core::domain::{Bar, PositionSide};
use stratexec_core::log::LogSink;
use stratexec_core::{Dispatcher, StrategyModule};
use stratexec_runner::replay::{run_backtest, RecordReason, ReplaySession};
use stratexec_runner::{builtin, synthetic_bars, BacktestConfig};

fn config(bars: usize, seed: u64) -> BacktestConfig {
    BacktestConfig { bars, seed, ..BacktestConfig::default() }
}

/// Buys once, on the first close above its 10-bar average.
fn buy_once_above_ma() -> StrategyModule {
    StrategyModule::new("buy_once").initialize(|_| Ok(())).handle_bar(|ctx, bar| {
        let symbol = "BTCUSDT";
        if ctx.position_quantity(symbol, PositionSide::Long) > 0.0 || !ctx.completed_orders().is_empty() {
            return Ok(());
        }
        let closes = ctx.closes(symbol, 11, None);
        if closes.len() < 11 {
            return Ok(());
        }
        let ma = |w: &[f64]| w.iter().sum::<f64>() / w.len() as f64;
        let prev_close = closes[9];
        if prev_close <= ma(&closes[..10]) && bar.close > ma(&closes[1..]) {
            ctx.order_buy(symbol, 1.0, None)?;
        }
        Ok(())
    })
}

fn run(module: StrategyModule, cfg: &BacktestConfig) -> stratexec_runner::BacktestResult {
    let bars = synthetic_bars(cfg).unwrap();
    let dispatcher = Dispatcher::load(module, cfg.engine.clone(), cfg.engine.load_calendar())
        .unwrap()
        .with_log_sink(LogSink::Discard);
    ReplaySession::new(dispatcher, cfg.clone()).unwrap().run(bars).unwrap()
}

// ─── Order timestamps follow the bars ────────────────────────────────

#[test]
fn single_crossover_buy_lands_on_its_own_bar() {
    let cfg = config(100, 42);
    let result = (0..20)
        .map(|seed| run(buy_once_above_ma(), &BacktestConfig { seed, ..cfg.clone() }))
        .find(|r| r.fills().count() == 1)
        .expect("some seed produces a crossover");

    let fill = result.fills().next().unwrap();
    let last_close = result.bars.last().unwrap().close_time;
    assert_eq!(fill.timestamp, result.bars[fill.bar_index].close_time);
    assert_eq!(fill.order.created_at, fill.timestamp);
    assert!(fill.bar_index >= 10);
    if fill.bar_index < result.bars.len() - 1 {
        assert_ne!(fill.timestamp, last_close);
    }
    assert_eq!(fill.price, Some(result.bars[fill.bar_index].close));
}

#[test]
fn ma_cross_orders_spread_across_the_run() {
    let result = (0..20)
        .map(|seed| run(builtin("ma_cross").unwrap(), &config(100, seed)))
        .find(|r| r.fills().count() >= 2)
        .expect("some seed produces a round trip");

    let last_close = result.bars.last().unwrap().close_time;
    let stamps: Vec<i64> = result.orders.iter().map(|r| r.timestamp).collect();
    assert!(stamps.iter().any(|t| *t != last_close));
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    let mut distinct = stamps.clone();
    distinct.dedup();
    assert!(distinct.len() >= 2);
    assert!(!result.decisions.is_empty());
}

// ─── Account state threads between bars ──────────────────────────────

#[test]
fn equity_curve_tracks_cash_and_position() {
    let result = run(builtin("ma_cross").unwrap(), &config(100, 3));
    assert_eq!(result.equity_curve.len(), 100);
    let last_bar: &Bar = result.bars.last().unwrap();
    let last = result.equity_curve.last().unwrap();
    let expected = last.cash + last.position * last_bar.close;
    assert!((last.equity - expected).abs() < 1e-6);
    assert!(result.final_account.balance("USDT").unwrap().free >= 0.0);
    assert_eq!(result.failed_bars, 0);
}

#[test]
fn replay_is_deterministic() {
    let cfg = config(80, 11);
    let a = run(builtin("ma_cross").unwrap(), &cfg);
    let b = run(builtin("ma_cross").unwrap(), &cfg);
    assert_eq!(a.orders, b.orders);
    assert_eq!(a.equity_curve, b.equity_curve);
}

// ─── Scheduled tasks in session markets ──────────────────────────────

#[test]
fn daily_dca_buys_whole_shares_once_per_trading_day() {
    let mut cfg = config(30, 5);
    cfg.symbol = "600000.XSHG".to_string();
    cfg.timeframe = "1d".to_string();
    cfg.quote_currency = "CNY".to_string();
    cfg.initial_cash = 1_000_000.0;
    cfg.params.insert("amount".to_string(), "1000".to_string());

    let result = run(builtin("daily_dca").unwrap(), &cfg);
    let fills: Vec<_> = result.fills().collect();
    assert_eq!(fills.len(), 30);
    assert!(fills.iter().all(|r| r.reason == RecordReason::MarketFill));
    assert!(fills.iter().all(|r| r.order.quantity.fract() == 0.0 && r.order.quantity > 0.0));
}

#[test]
fn run_backtest_rejects_module_without_initialize() {
    let cfg = config(10, 1);
    let bars = synthetic_bars(&cfg).unwrap();
    assert!(run_backtest(StrategyModule::new("empty"), &cfg, bars).is_err());
}
