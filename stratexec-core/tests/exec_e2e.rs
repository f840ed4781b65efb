//! End-to-end exec calls through the service: request in, response out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use stratexec_core::compat;
use stratexec_core::domain::{Account, Bar, OrderKind, OrderSide, StrategyKey};
use stratexec_core::exec::{ExecRequest, ExecStatus, MarketDataContext, OrderOp, TriggerKind};
use stratexec_core::log::LogSink;
use stratexec_core::registry;
use stratexec_core::scheduler::TradeCalendar;
use stratexec_core::{EngineConfig, ExecService, Health, StrategyError, StrategyModule};

// ── Helpers ──────────────────────────────────────────────────────────

const HOUR_MS: i64 = 3_600_000;
/// 2024-03-04 00:00 UTC, a Monday.
const MONDAY: i64 = 1_709_510_400_000;

fn hourly_bar(close_time: i64, close: f64) -> Bar {
    Bar {
        open_time: close_time - HOUR_MS + 1,
        close_time,
        open: close,
        high: close + 5.0,
        low: close - 5.0,
        close,
        volume: 10.0,
    }
}

fn request(exec_id: &str, symbol: &str, close_time: i64, close: f64) -> ExecRequest {
    let md = MarketDataContext::new(symbol, "1h", vec![hourly_bar(close_time, close)]);
    let mut req = ExecRequest::market_data(exec_id, vec![md]);
    req.account_id = "acc-1".into();
    req.strategy_id = "watcher".into();
    req.account = Account::with_cash("USDT", 10_000.0);
    req
}

fn service(module: StrategyModule) -> ExecService {
    let mut svc = ExecService::with_calendar(EngineConfig::default(), Arc::new(TradeCalendar::builtin()))
        .with_log_sink(LogSink::Discard);
    svc.register_strategy(module).unwrap();
    svc
}

// ── Scenarios ────────────────────────────────────────────────────────

#[test]
fn limit_buy_below_market() {
    let svc = service(StrategyModule::new("watcher").initialize(|_| Ok(())).handle_bar(|ctx, _| {
        ctx.order_buy("X", 0.1, Some(42_000.0))?;
        Ok(())
    }));
    let resp = svc.execute(request("e-1", "X", MONDAY, 42_050.0));

    assert_eq!(resp.status, ExecStatus::Success);
    assert_eq!(resp.events.len(), 1);
    let event = &resp.events[0];
    assert_eq!(event.op, OrderOp::Create);
    assert_eq!(event.order.side, OrderSide::Buy);
    assert_eq!(event.order.kind, OrderKind::Limit { limit_price: 42_000.0 });
    assert_eq!(event.order.quantity, 0.1);
    assert!(resp.error_message.is_none());
}

#[test]
fn g_is_fresh_per_call_but_init_runs_once() {
    let init_calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&init_calls);
    let svc = service(
        StrategyModule::new("watcher")
            .initialize(move |setup| {
                seen.fetch_add(1, Ordering::SeqCst);
                setup.set("threshold", 42_000.0);
                Ok(())
            })
            .handle_bar(|ctx, _| {
                let previous = compat::with_g(|g| g.insert("touched".into(), true.into()))?;
                if previous.is_some() {
                    return Err(StrategyError::msg("g leaked from an earlier call"));
                }
                if ctx.setting_f64("threshold") != Some(42_000.0) {
                    return Err(StrategyError::msg("init outcome missing"));
                }
                Ok(())
            }),
    );

    for (i, exec_id) in ["e-1", "e-2"].iter().enumerate() {
        let resp = svc.execute(request(exec_id, "X", MONDAY + i as i64 * HOUR_MS, 42_050.0));
        assert_eq!(resp.status, ExecStatus::Success, "{:?}", resp.error_message);
    }
    assert_eq!(init_calls.load(Ordering::SeqCst), 1);
    assert_eq!(svc.health(&StrategyKey::new("acc-1", "watcher")), Some(Health::Ready));
}

#[test]
fn registry_empty_around_every_call() {
    let svc = service(
        StrategyModule::new("watcher")
            .initialize(|_| Ok(()))
            .handle_bar(|_, bar| {
                assert!(registry::is_active());
                if bar.close > 100.0 {
                    panic!("panicking strategy");
                }
                Err(StrategyError::msg("failing strategy"))
            }),
    );
    assert!(!registry::is_active());
    for (exec_id, close) in [("ok", 50.0), ("panic", 500.0)] {
        let resp = svc.execute(request(exec_id, "X", MONDAY, close));
        assert_eq!(resp.status, ExecStatus::Failed);
        assert!(!registry::is_active());
    }
    assert!(compat::order_buy("X", 1.0, None).is_err());
}

#[test]
fn partial_success_keeps_orders_before_error() {
    let svc = service(StrategyModule::new("watcher").initialize(|_| Ok(())).handle_bar(|ctx, _| {
        ctx.order_buy("X", 0.1, None)?;
        ctx.order_sell("X", 0.2, Some(43_000.0))?;
        ctx.order_buy("X", -1.0, None)?;
        Ok(())
    }));
    let resp = svc.execute(request("e-1", "X", MONDAY, 42_050.0));
    assert_eq!(resp.status, ExecStatus::PartialSuccess);
    assert_eq!(resp.status.code(), 1);
    assert_eq!(resp.events.len(), 2);
    assert!(resp.error_message.unwrap().contains("invalid quantity"));
}

#[test]
fn scheduled_open_task_continuous_vs_session() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let module = StrategyModule::new("watcher")
        .initialize(|setup| {
            setup.run_daily("at_open", "open", "")?;
            Ok(())
        })
        .function("at_open", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    // Continuous: due in the first hourly bar of each UTC day, weekend included.
    let svc = service(module.clone());
    for day in 0..7 {
        let first_bar = MONDAY + day * 24 * HOUR_MS + HOUR_MS - 1;
        svc.execute(request(&format!("c-{day}"), "BTCUSDT", first_bar, 1.0));
        svc.execute(request(&format!("c-{day}-late"), "BTCUSDT", first_bar + 6 * HOUR_MS, 1.0));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 7);

    // A-share: open 09:30 Shanghai = 01:30 UTC; weekdays only.
    runs.store(0, Ordering::SeqCst);
    let svc = service(module);
    for day in 0..7 {
        let bar_after_open = MONDAY + day * 24 * HOUR_MS + 2 * HOUR_MS;
        svc.execute(request(&format!("s-{day}"), "600000.XSHG", bar_after_open, 1.0));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 5);
}

#[test]
fn order_status_and_risk_triggers() {
    let svc = service(
        StrategyModule::new("watcher")
            .initialize(|_| Ok(()))
            .on_order(|ctx, order| {
                if order.side == OrderSide::Buy {
                    ctx.order_sell(&order.symbol, order.quantity, Some(50_000.0))?;
                }
                Ok(())
            })
            .on_risk_event(|ctx, _| {
                for open in ctx.incomplete_orders() {
                    ctx.cancel_order(open.unique_id.as_str())?;
                }
                Ok(())
            }),
    );

    let mut filled = stratexec_core::domain::Order::new(
        stratexec_core::domain::UniqueId::new("buy-1"),
        "X",
        OrderSide::Buy,
        OrderKind::Market,
        0.5,
        MONDAY,
    );
    filled.record_fill(0.5, 42_000.0, 0.0, MONDAY).unwrap();
    let mut req = request("e-1", "X", MONDAY, 42_050.0);
    req.trigger = TriggerKind::OrderStatus;
    req.trigger_detail.orders.push(filled);
    let resp = svc.execute(req);
    assert_eq!(resp.events.len(), 1);
    let take_profit = resp.events[0].order.clone();
    assert_eq!(take_profit.kind, OrderKind::Limit { limit_price: 50_000.0 });

    let mut req = request("e-2", "X", MONDAY + HOUR_MS, 42_050.0);
    req.trigger = TriggerKind::RiskEvent;
    req.incomplete_orders.push(take_profit);
    let resp = svc.execute(req);
    assert_eq!(resp.status, ExecStatus::Success);
    assert_eq!(resp.events_of(OrderOp::Cancel).count(), 1);
}

#[test]
fn timeout_fails_without_events() {
    let svc = service(StrategyModule::new("watcher").initialize(|_| Ok(())).handle_bar(|ctx, _| {
        ctx.order_buy("X", 1.0, None)?;
        std::thread::sleep(std::time::Duration::from_millis(50));
        ctx.order_buy("X", 1.0, None)?;
        Ok(())
    }));
    let mut req = request("e-1", "X", MONDAY, 1.0);
    req.max_timeout = Some(0.01);
    let resp = svc.execute(req);
    assert_eq!(resp.status, ExecStatus::Failed);
    assert!(resp.events.is_empty());
}

#[test]
fn response_serializes_to_wire_json() {
    let svc = service(StrategyModule::new("watcher").initialize(|_| Ok(())).handle_bar(|ctx, _| {
        ctx.order_buy("X", 0.1, Some(42_000.0))?;
        Ok(())
    }));
    let resp = svc.execute(request("e-1", "X", MONDAY, 42_050.0));
    let json = serde_json::to_value(&resp).unwrap();
    assert_eq!(json["status"], "SUCCESS");
    assert_eq!(json["events"][0]["op"], "CREATE");
    assert_eq!(json["events"][0]["order"]["kind"]["type"], "LIMIT");
}
