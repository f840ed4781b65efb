//! Built-in demo strategies for the backtest CLI.

use std::collections::BTreeMap;

use stratexec_core::compat;
use stratexec_core::exec::Decision;
use stratexec_core::{Context, StrategyError, StrategyModule, StrategyResult};

pub const DEFAULT_FAST: usize = 5;
pub const DEFAULT_SLOW: usize = 20;
/// Share of free cash committed on an entry signal.
pub const ALLOCATION: f64 = 0.95;
pub const DEFAULT_DCA_AMOUNT: f64 = 100.0;

/// Names accepted by [`builtin`].
pub const BUILTIN_NAMES: &[&str] = &["ma_cross", "daily_dca"];

pub fn builtin(name: &str) -> Option<StrategyModule> {
    match name {
        "ma_cross" => Some(ma_cross()),
        "daily_dca" => Some(daily_dca()),
        _ => None,
    }
}

fn primary_symbol(ctx: &Context) -> Option<String> {
    ctx.request().primary_market_data().map(|m| m.symbol.clone())
}

fn parse_period(raw: Option<&str>, default: usize, name: &str) -> Result<usize, StrategyError> {
    match raw {
        None => Ok(default),
        Some(s) => match s.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(StrategyError::msg(format!("{name} must be a positive integer, got '{s}'"))),
        },
    }
}

fn sma(values: &[f64], period: usize) -> f64 {
    let window = &values[values.len() - period..];
    window.iter().sum::<f64>() / period as f64
}

// ─── Moving-average crossover ────────────────────────────────────────

/// Long-only crossover: enter with [`ALLOCATION`] of free cash when the fast
/// SMA crosses above the slow one, exit fully on the cross back below.
///
/// Params: `fast` (default 5), `slow` (default 20).
pub fn ma_cross() -> StrategyModule {
    StrategyModule::new("ma_cross")
        .initialize(|setup| {
            let fast = parse_period(setup.param("fast"), DEFAULT_FAST, "fast")?;
            let slow = parse_period(setup.param("slow"), DEFAULT_SLOW, "slow")?;
            if fast >= slow {
                return Err(StrategyError::msg(format!("fast ({fast}) must be shorter than slow ({slow})")));
            }
            setup.set("fast", fast as u64);
            setup.set("slow", slow as u64);
            Ok(())
        })
        .handle_bar(ma_cross_bar)
}

fn ma_cross_bar(ctx: &Context, bar: &stratexec_core::domain::Bar) -> StrategyResult {
    let Some(md) = ctx.request().primary_market_data() else {
        return Ok(());
    };
    let symbol = md.symbol.clone();
    let fast = ctx.setting_f64("fast").map_or(DEFAULT_FAST, |v| v as usize);
    let slow = ctx.setting_f64("slow").map_or(DEFAULT_SLOW, |v| v as usize);
    // Warm-up: stay quiet until a full slow window plus one bar exists.
    if md.bars.len() < slow + 1 {
        return Ok(());
    }

    let closes = ctx.closes(&symbol, slow + 1, None);
    let (prev, cur) = (&closes[..slow], &closes[1..]);
    let (prev_fast, prev_slow) = (sma(prev, fast), sma(prev, slow));
    let (cur_fast, cur_slow) = (sma(cur, fast), sma(cur, slow));
    let crossed_up = prev_fast <= prev_slow && cur_fast > cur_slow;
    let crossed_down = prev_fast >= prev_slow && cur_fast < cur_slow;
    let held = ctx.account().net_quantity(&symbol);

    let (decision_type, reason) = if crossed_up && held == 0.0 {
        let budget = ctx.available_cash() * ALLOCATION;
        if budget < bar.close && ctx.market_type(&symbol).trades_whole_units() {
            ("HOLD", "golden cross but cash below one unit")
        } else {
            ctx.order_value(&symbol, budget, None)?;
            ("BUY", "fast SMA crossed above slow SMA")
        }
    } else if crossed_down && held > 0.0 {
        ctx.order_target(&symbol, 0.0, None)?;
        ("SELL", "fast SMA crossed below slow SMA")
    } else {
        return Ok(());
    };

    ctx.record_decision(Decision {
        timestamp: ctx.now_ms(),
        symbol: symbol.clone(),
        decision_type: decision_type.to_string(),
        indicators: BTreeMap::from([
            (format!("sma_{fast}"), cur_fast),
            (format!("sma_{slow}"), cur_slow),
            ("close".to_string(), bar.close),
        ]),
        trigger_condition: format!("sma_{fast} vs sma_{slow}"),
        condition_result: crossed_up,
        decision_reason: reason.to_string(),
        strategy_state: serde_json::json!({ "position": held }),
    });
    Ok(())
}

// ─── Scheduled dollar-cost averaging ─────────────────────────────────

/// Buys `amount` (default 100) of the primary symbol at every market open,
/// using the free-function [`compat`] API.
pub fn daily_dca() -> StrategyModule {
    StrategyModule::new("daily_dca")
        .initialize(|setup| {
            let amount = match setup.param("amount") {
                None => DEFAULT_DCA_AMOUNT,
                Some(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|a| a.is_finite() && *a > 0.0)
                    .ok_or_else(|| StrategyError::msg(format!("amount must be positive, got '{s}'")))?,
            };
            setup.set("amount", amount);
            setup.run_daily("buy_open", "open", "")?;
            Ok(())
        })
        .function("buy_open", |ctx| {
            let Some(symbol) = primary_symbol(ctx) else {
                return Ok(());
            };
            let amount = ctx.setting_f64("amount").unwrap_or(DEFAULT_DCA_AMOUNT);
            if ctx.available_cash() < amount {
                compat::log::warn("cash exhausted, skipping buy")?;
                return Ok(());
            }
            let buys = compat::with_g(|g| {
                let n = g.get("buys").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
                g.insert("buys".to_string(), n.into());
                n
            })?;
            compat::order_value(&symbol, amount, None)?;
            compat::log::info(&format!("{} buy of {amount} {symbol}", compat::current_dt()?.date_naive()))?;
            ctx.record_decision(Decision {
                timestamp: ctx.now_ms(),
                symbol,
                decision_type: "BUY".to_string(),
                indicators: BTreeMap::from([("amount".to_string(), amount)]),
                trigger_condition: "market open".to_string(),
                condition_result: true,
                decision_reason: "scheduled buy".to_string(),
                strategy_state: serde_json::json!({ "buys_this_call": buys }),
            });
            Ok(())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stratexec_core::domain::Bar;
    use stratexec_core::exec::{ExecRequest, ExecStatus, MarketDataContext, OrderOp};
    use stratexec_core::log::LogSink;
    use stratexec_core::scheduler::TradeCalendar;
    use stratexec_core::{Dispatcher, EngineConfig};

    fn bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar {
                open_time: i as i64 * 3_600_000,
                close_time: (i as i64 + 1) * 3_600_000 - 1,
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: 1.0,
            })
            .collect()
    }

    fn dispatcher(module: StrategyModule) -> Dispatcher {
        Dispatcher::load(module, EngineConfig::default(), Arc::new(TradeCalendar::builtin()))
            .unwrap()
            .with_log_sink(LogSink::Discard)
    }

    fn request(closes: &[f64], params: &[(&str, &str)]) -> ExecRequest {
        let mut req = ExecRequest::market_data("t", vec![MarketDataContext::new("BTCUSDT", "1h", bars(closes))]);
        req.account = stratexec_core::domain::Account::with_cash("USDT", 1_000.0);
        req.params = params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        req
    }

    #[test]
    fn builtin_names_resolve() {
        for name in BUILTIN_NAMES {
            assert_eq!(builtin(name).unwrap().name(), *name);
        }
        assert!(builtin("nope").is_none());
    }

    #[test]
    fn ma_cross_buys_on_golden_cross() {
        let mut d = dispatcher(ma_cross());
        let resp = d.execute(request(&[10.0, 10.0, 10.0, 9.0, 12.0], &[("fast", "2"), ("slow", "4")]));
        assert_eq!(resp.status, ExecStatus::Success);
        assert_eq!(resp.events_of(OrderOp::Create).count(), 1);
        assert_eq!(resp.decisions[0].decision_type, "BUY");
        assert!(resp.decisions[0].indicators.contains_key("sma_2"));
    }

    #[test]
    fn ma_cross_waits_for_history() {
        let mut d = dispatcher(ma_cross());
        let resp = d.execute(request(&[1.0, 2.0, 3.0], &[]));
        assert_eq!(resp.status, ExecStatus::Success);
        assert!(resp.events.is_empty());
    }

    #[test]
    fn ma_cross_rejects_inverted_periods() {
        let mut d = dispatcher(ma_cross());
        let resp = d.execute(request(&[1.0; 30], &[("fast", "10"), ("slow", "3")]));
        assert_eq!(resp.status, ExecStatus::Failed);
        assert!(resp.error_message.unwrap().contains("shorter"));
    }

    #[test]
    fn daily_dca_buys_in_the_open_window_only() {
        let mut d = dispatcher(daily_dca());
        // Last bar closes at 00:59:59.999 UTC: inside the open window.
        let resp = d.execute(request(&[100.0], &[("amount", "50")]));
        assert_eq!(resp.events_of(OrderOp::Create).count(), 1);
        assert_eq!(resp.events[0].order.quantity, 0.5);

        // Closes at 01:59:59.999: not due.
        let resp = d.execute(request(&[100.0, 100.0], &[("amount", "50")]));
        assert!(resp.events.is_empty());
    }
}
