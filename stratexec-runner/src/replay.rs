//! Backtest replay — the stateless exec pipeline driven bar by bar.
//!
//! The [`ReplaySession`] is the only owner of state across exec calls: the
//! account, the book of resting orders and everything recorded for export.
//! Four phases per bar:
//!
//! 1. **Match** — resting limit/stop orders submitted on an earlier bar are
//!    checked against this bar's range and filled.
//! 2. **Exec** — one market-data exec call whose history ends at this bar
//!    and whose trigger time is the bar close.
//! 3. **Apply** — create/cancel/modify intents from the response: market
//!    orders fill at the close, priced orders rest, unaffordable buys and
//!    sells beyond the position are rejected.
//! 4. **Mark** — positions are marked at the close and an equity point is
//!    recorded.
//!
//! A failed exec call leaves the account as it was.

use serde::{Deserialize, Serialize};
use stratexec_core::domain::{Account, Bar, MarketType, Order, OrderId, OrderKind, OrderSide};
use stratexec_core::exec::{
    Decision, ExecRequest, ExecResponse, ExecStatus, MarketDataContext, OrderOp, TriggerKind,
};
use stratexec_core::strategy::LoadError;
use stratexec_core::{Dispatcher, StrategyModule};
use thiserror::Error;

use crate::accounting::{self, Fill};
use crate::config::BacktestConfig;

pub const ACCOUNT_ID: &str = "backtest";

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("no bars to replay")]
    EmptyBars,

    #[error("bar index {index} out of range for {len} bars")]
    BarIndex { index: usize, len: usize },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("invalid backtest config: {0}")]
    Config(String),
}

/// Why an order record was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordReason {
    MarketFill,
    LimitFill,
    StopFill,
    Submitted,
    Canceled,
    Modified,
    Rejected,
}

impl RecordReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordReason::MarketFill => "MARKET_FILL",
            RecordReason::LimitFill => "LIMIT_FILL",
            RecordReason::StopFill => "STOP_FILL",
            RecordReason::Submitted => "SUBMITTED",
            RecordReason::Canceled => "CANCELED",
            RecordReason::Modified => "MODIFIED",
            RecordReason::Rejected => "REJECTED",
        }
    }

    pub fn is_fill(self) -> bool {
        matches!(self, RecordReason::MarketFill | RecordReason::LimitFill | RecordReason::StopFill)
    }
}

/// One order event as it happened during the replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub bar_index: usize,
    /// Close time of the bar the event happened on (ms).
    pub timestamp: i64,
    pub op: OrderOp,
    pub reason: RecordReason,
    /// Fill price for fills, the order's limit/stop price otherwise.
    pub price: Option<f64>,
    pub order: Order,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub bar_index: usize,
    pub timestamp: i64,
    pub equity: f64,
    pub cash: f64,
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub symbol: String,
    pub market: MarketType,
    pub timeframe: String,
    pub initial_cash: f64,
    pub bars: Vec<Bar>,
    pub orders: Vec<OrderRecord>,
    pub decisions: Vec<Decision>,
    pub warnings: Vec<String>,
    pub equity_curve: Vec<EquityPoint>,
    pub final_account: Account,
    pub realized_pnl: f64,
    /// Bars whose exec call failed.
    pub failed_bars: usize,
}

impl BacktestResult {
    pub fn final_equity(&self) -> f64 {
        self.equity_curve.last().map_or(self.initial_cash, |p| p.equity)
    }

    pub fn total_return(&self) -> f64 {
        if self.initial_cash > 0.0 {
            self.final_equity() / self.initial_cash - 1.0
        } else {
            0.0
        }
    }

    pub fn fills(&self) -> impl Iterator<Item = &OrderRecord> {
        self.orders.iter().filter(|r| r.reason.is_fill())
    }
}

#[derive(Debug, Clone)]
struct Resting {
    order: Order,
    eligible_from: usize,
}

pub struct ReplaySession {
    dispatcher: Dispatcher,
    config: BacktestConfig,
    market: MarketType,
    account: Account,
    resting: Vec<Resting>,
    completed: Vec<Order>,
    orders: Vec<OrderRecord>,
    decisions: Vec<Decision>,
    warnings: Vec<String>,
    equity_curve: Vec<EquityPoint>,
    realized_pnl: f64,
    failed_bars: usize,
    next_order_id: u64,
}

impl ReplaySession {
    pub fn new(dispatcher: Dispatcher, config: BacktestConfig) -> Result<Self, ReplayError> {
        let market = config.market().map_err(|e| ReplayError::Config(e.to_string()))?;
        let account = Account::with_cash(config.quote_currency.clone(), config.initial_cash);
        Ok(Self {
            dispatcher,
            config,
            market,
            account,
            resting: Vec::new(),
            completed: Vec::new(),
            orders: Vec::new(),
            decisions: Vec::new(),
            warnings: Vec::new(),
            equity_curve: Vec::new(),
            realized_pnl: 0.0,
            failed_bars: 0,
            next_order_id: 1,
        })
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn resting_orders(&self) -> impl Iterator<Item = &Order> {
        self.resting.iter().map(|r| &r.order)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Run phases 1–4 for `history[index]`, with `history[..=index]` as the
    /// visible window.
    pub fn step(&mut self, history: &[Bar], index: usize) -> Result<ExecResponse, ReplayError> {
        let Some(bar) = history.get(index) else {
            return Err(ReplayError::BarIndex { index, len: history.len() });
        };
        self.match_resting(index, bar);

        let request = self.build_request(history, index);
        let response = self.dispatcher.execute(request);
        self.decisions.extend(response.decisions.iter().cloned());
        self.warnings
            .extend(response.warnings.iter().map(|w| format!("bar {index}: {w}")));

        if response.status == ExecStatus::Failed {
            self.failed_bars += 1;
            let msg = response.error_message.as_deref().unwrap_or("unknown error");
            tracing::warn!(bar = index, error = msg, "exec call failed; account unchanged");
            self.warnings.push(format!("bar {index}: exec failed: {msg}"));
        } else {
            for event in &response.events {
                self.apply_event(index, bar, event.op, event.order.clone());
            }
        }

        self.mark(index, bar);
        Ok(response)
    }

    /// Replay every bar in order and hand back the recorded result.
    pub fn run(mut self, bars: Vec<Bar>) -> Result<BacktestResult, ReplayError> {
        if bars.is_empty() {
            return Err(ReplayError::EmptyBars);
        }
        tracing::info!(
            strategy = self.dispatcher.strategy_name(),
            symbol = %self.config.symbol,
            bars = bars.len(),
            "backtest started"
        );
        for index in 0..bars.len() {
            self.step(&bars, index)?;
        }
        let result = BacktestResult {
            strategy: self.dispatcher.strategy_name().to_string(),
            symbol: self.config.symbol.clone(),
            market: self.market,
            timeframe: self.config.timeframe.clone(),
            initial_cash: self.config.initial_cash,
            bars,
            orders: self.orders,
            decisions: self.decisions,
            warnings: self.warnings,
            equity_curve: self.equity_curve,
            final_account: self.account,
            realized_pnl: self.realized_pnl,
            failed_bars: self.failed_bars,
        };
        tracing::info!(
            orders = result.orders.len(),
            final_equity = result.final_equity(),
            failed_bars = result.failed_bars,
            "backtest finished"
        );
        Ok(result)
    }

    // ── Phase 1: match resting orders ────────────────────────────────

    fn match_resting(&mut self, index: usize, bar: &Bar) {
        let resting = std::mem::take(&mut self.resting);
        for entry in resting {
            if entry.eligible_from > index {
                self.resting.push(entry);
                continue;
            }
            match fill_price(&entry.order, bar) {
                Some(price) => {
                    let reason = match entry.order.kind {
                        OrderKind::StopMarket { .. } | OrderKind::StopLimit { .. } => RecordReason::StopFill,
                        _ => RecordReason::LimitFill,
                    };
                    self.fill(index, bar, entry.order, price, reason);
                }
                None => self.resting.push(entry),
            }
        }
    }

    // ── Phase 2: exec ────────────────────────────────────────────────

    fn build_request(&self, history: &[Bar], index: usize) -> ExecRequest {
        let md = MarketDataContext::new(
            self.config.symbol.clone(),
            self.config.timeframe.clone(),
            history[..=index].to_vec(),
        );
        let mut req = ExecRequest::market_data(
            format!("{}-{}-{index}", self.config.strategy, self.config.symbol),
            vec![md],
        );
        req.trigger = TriggerKind::MarketData;
        req.trigger_detail.trigger_time = Some(history[index].close_time);
        req.account_id = ACCOUNT_ID.to_string();
        req.strategy_id = self.dispatcher.strategy_name().to_string();
        req.account = self.account.clone();
        req.incomplete_orders = self.resting_orders().cloned().collect();
        req.completed_orders = self.completed.clone();
        req.exchange = "BACKTEST".to_string();
        req.params = self.config.params.clone();
        if let Some(mt) = &self.config.market_type {
            req.params.insert("market_type".to_string(), mt.clone());
        }
        req
    }

    // ── Phase 3: apply intents ───────────────────────────────────────

    fn apply_event(&mut self, index: usize, bar: &Bar, op: OrderOp, mut order: Order) {
        match op {
            OrderOp::Create => {
                order.order_id = Some(self.assign_order_id());
                if order.kind == OrderKind::Market {
                    self.fill(index, bar, order, bar.close, RecordReason::MarketFill);
                } else {
                    let price = order.kind.limit_price().or(order.kind.stop_price());
                    self.record(index, bar, OrderOp::Create, RecordReason::Submitted, price, order.clone(), None);
                    self.resting.push(Resting { order, eligible_from: index + 1 });
                }
            }
            OrderOp::Cancel => {
                let Some(pos) = self.resting.iter().position(|r| r.order.unique_id == order.unique_id) else {
                    self.warnings.push(format!("bar {index}: cancel for unknown order {}", order.unique_id));
                    return;
                };
                let mut canceled = self.resting.remove(pos).order;
                if let Err(e) = canceled.cancel("canceled by strategy", bar.close_time) {
                    self.warnings.push(format!("bar {index}: {e}"));
                }
                let price = canceled.kind.limit_price().or(canceled.kind.stop_price());
                self.record(index, bar, OrderOp::Cancel, RecordReason::Canceled, price, canceled.clone(), None);
                self.completed.push(canceled);
            }
            OrderOp::Modify => {
                let Some(entry) = self.resting.iter_mut().find(|r| r.order.unique_id == order.unique_id) else {
                    self.warnings.push(format!("bar {index}: modify for unknown order {}", order.unique_id));
                    return;
                };
                entry.order.quantity = order.quantity;
                entry.order.kind = order.kind;
                entry.order.updated_at = bar.close_time;
                let modified = entry.order.clone();
                let price = modified.kind.limit_price().or(modified.kind.stop_price());
                self.record(index, bar, OrderOp::Modify, RecordReason::Modified, price, modified, None);
            }
        }
    }

    fn fill(&mut self, index: usize, bar: &Bar, mut order: Order, price: f64, reason: RecordReason) {
        let quantity = order.remaining_quantity();
        let commission = quantity * price * self.config.commission_rate;
        let fill = Fill {
            symbol: order.symbol.clone(),
            side: order.side,
            quantity,
            price,
            commission,
        };
        match accounting::apply_fill(&mut self.account, &self.config.quote_currency, &fill) {
            Ok(realized) => {
                self.realized_pnl += realized;
                if let Err(e) = order.record_fill(quantity, price, commission, bar.close_time) {
                    self.warnings.push(format!("bar {index}: {e}"));
                }
                tracing::debug!(bar = index, unique_id = %order.unique_id, side = %order.side, quantity, price, "filled");
                self.record(index, bar, OrderOp::Create, reason, Some(price), order.clone(), None);
            }
            Err(rejection) => {
                let detail = rejection.to_string();
                tracing::warn!(bar = index, unique_id = %order.unique_id, reason = %detail, "order rejected");
                if let Err(e) = order.reject(detail.clone(), bar.close_time) {
                    self.warnings.push(format!("bar {index}: {e}"));
                }
                self.record(index, bar, OrderOp::Create, RecordReason::Rejected, Some(price), order.clone(), Some(detail));
            }
        }
        self.completed.push(order);
    }

    // ── Phase 4: mark ────────────────────────────────────────────────

    fn mark(&mut self, index: usize, bar: &Bar) {
        accounting::mark_to_market(&mut self.account, &self.config.symbol, bar.close);
        let cash = self.account.balance(&self.config.quote_currency).map_or(0.0, |b| b.total());
        self.equity_curve.push(EquityPoint {
            bar_index: index,
            timestamp: bar.close_time,
            equity: self.account.net_value,
            cash,
            position: self.account.net_quantity(&self.config.symbol),
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        bar_index: usize,
        bar: &Bar,
        op: OrderOp,
        reason: RecordReason,
        price: Option<f64>,
        order: Order,
        detail: Option<String>,
    ) {
        self.orders.push(OrderRecord {
            bar_index,
            timestamp: bar.close_time,
            op,
            reason,
            price,
            order,
            detail,
        });
    }

    fn assign_order_id(&mut self) -> OrderId {
        let id = OrderId::new(format!("BT{:08}", self.next_order_id));
        self.next_order_id += 1;
        id
    }
}

/// Fill price of a resting order on `bar`, if it triggers.
///
/// Limits fill at the limit or at a better open; stops fill at the stop or at
/// a worse open when the bar gaps through it.
pub fn fill_price(order: &Order, bar: &Bar) -> Option<f64> {
    if bar.is_void() {
        return None;
    }
    match (order.kind, order.side) {
        (OrderKind::Market, _) => Some(bar.open),
        (OrderKind::Limit { limit_price }, side) => limit_fill(side, limit_price, bar),
        (OrderKind::StopMarket { stop_price }, side) => stop_fill(side, stop_price, bar),
        (OrderKind::StopLimit { stop_price, limit_price }, side) => {
            let triggered_at = stop_fill(side, stop_price, bar)?;
            let within_limit = match side {
                OrderSide::Buy => triggered_at <= limit_price,
                OrderSide::Sell => triggered_at >= limit_price,
            };
            if within_limit {
                Some(triggered_at)
            } else {
                limit_fill(side, limit_price, bar).map(|_| limit_price)
            }
        }
    }
}

fn limit_fill(side: OrderSide, limit: f64, bar: &Bar) -> Option<f64> {
    match side {
        OrderSide::Buy if bar.low <= limit => Some(bar.open.min(limit)),
        OrderSide::Sell if bar.high >= limit => Some(bar.open.max(limit)),
        _ => None,
    }
}

fn stop_fill(side: OrderSide, stop: f64, bar: &Bar) -> Option<f64> {
    match side {
        OrderSide::Buy if bar.high >= stop => Some(bar.open.max(stop)),
        OrderSide::Sell if bar.low <= stop => Some(bar.open.min(stop)),
        _ => None,
    }
}

/// Load `module`, replay `bars` under `config` and return the result.
pub fn run_backtest(
    module: StrategyModule,
    config: &BacktestConfig,
    bars: Vec<Bar>,
) -> Result<BacktestResult, ReplayError> {
    let dispatcher = Dispatcher::load(module, config.engine.clone(), config.engine.load_calendar())?;
    ReplaySession::new(dispatcher, config.clone())?.run(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratexec_core::domain::{OrderStatus, UniqueId};
    use stratexec_core::log::LogSink;
    use stratexec_core::scheduler::TradeCalendar;
    use stratexec_core::{EngineConfig, StrategyError};
    use std::sync::Arc;

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            open_time: i * 3_600_000,
            close_time: (i + 1) * 3_600_000 - 1,
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    fn flat_bars(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| bar(i as i64, *c, c + 1.0, c - 1.0, *c))
            .collect()
    }

    fn session(module: StrategyModule, cash: f64) -> ReplaySession {
        let config = BacktestConfig { initial_cash: cash, ..BacktestConfig::default() };
        let dispatcher = Dispatcher::load(module, EngineConfig::default(), Arc::new(TradeCalendar::builtin()))
            .unwrap()
            .with_log_sink(LogSink::Discard);
        ReplaySession::new(dispatcher, config).unwrap()
    }

    fn order(kind: OrderKind, side: OrderSide) -> Order {
        Order::new(UniqueId::new("u"), "BTCUSDT", side, kind, 1.0, 0)
    }

    #[test]
    fn limit_fills_at_limit_or_better_open() {
        let b = bar(0, 100.0, 105.0, 95.0, 101.0);
        assert_eq!(fill_price(&order(OrderKind::Limit { limit_price: 97.0 }, OrderSide::Buy), &b), Some(97.0));
        assert_eq!(fill_price(&order(OrderKind::Limit { limit_price: 102.0 }, OrderSide::Buy), &b), Some(100.0));
        assert_eq!(fill_price(&order(OrderKind::Limit { limit_price: 94.0 }, OrderSide::Buy), &b), None);
        assert_eq!(fill_price(&order(OrderKind::Limit { limit_price: 104.0 }, OrderSide::Sell), &b), Some(104.0));
    }

    #[test]
    fn stops_fill_at_worse_open_on_gap() {
        let gap_down = bar(0, 90.0, 92.0, 88.0, 91.0);
        let stop = order(OrderKind::StopMarket { stop_price: 95.0 }, OrderSide::Sell);
        assert_eq!(fill_price(&stop, &gap_down), Some(90.0));
        let normal = bar(0, 100.0, 101.0, 94.0, 96.0);
        assert_eq!(fill_price(&stop, &normal), Some(95.0));
        let stop_limit = order(OrderKind::StopLimit { stop_price: 95.0, limit_price: 93.0 }, OrderSide::Sell);
        assert_eq!(fill_price(&stop_limit, &gap_down), None);
    }

    #[test]
    fn market_buy_fills_at_close_and_carries_position() {
        let mut s = session(
            StrategyModule::new("once").initialize(|_| Ok(())).handle_bar(|ctx, _| {
                if ctx.position_quantity("BTCUSDT", stratexec_core::domain::PositionSide::Long) == 0.0 {
                    ctx.order_buy("BTCUSDT", 2.0, None)?;
                }
                Ok(())
            }),
            1_000.0,
        );
        let bars = flat_bars(&[100.0, 110.0, 120.0]);
        for i in 0..bars.len() {
            s.step(&bars, i).unwrap();
        }
        assert_eq!(s.account().net_quantity("BTCUSDT"), 2.0);
        assert_eq!(s.account().balance("USDT").unwrap().free, 800.0);
        assert_eq!(s.account().net_value, 1_040.0);
    }

    #[test]
    fn limit_order_rests_until_next_bar() {
        let s = session(
            StrategyModule::new("dip").initialize(|_| Ok(())).handle_bar(|ctx, bar| {
                if ctx.incomplete_orders().is_empty() && ctx.completed_orders().is_empty() {
                    ctx.order_buy("BTCUSDT", 1.0, Some(bar.close - 0.5))?;
                }
                Ok(())
            }),
            1_000.0,
        );
        // Bar 0's own range covers the limit but the order is not eligible yet.
        let bars = vec![bar(0, 100.0, 101.0, 99.0, 100.0), bar(1, 100.0, 100.2, 99.8, 100.0), bar(2, 100.0, 100.0, 99.0, 99.2)];
        let result = s.run(bars).unwrap();
        let reasons: Vec<_> = result.orders.iter().map(|r| (r.bar_index, r.reason)).collect();
        assert_eq!(reasons, vec![(0, RecordReason::Submitted), (2, RecordReason::LimitFill)]);
        assert_eq!(result.orders[1].price, Some(99.5));
        assert_eq!(result.orders[1].order.status, OrderStatus::Filled);
    }

    #[test]
    fn oversell_and_overspend_are_rejected() {
        let s = session(
            StrategyModule::new("greedy").initialize(|_| Ok(())).handle_bar(|ctx, _| {
                ctx.order_sell("BTCUSDT", 1.0, None)?;
                ctx.order_buy("BTCUSDT", 100.0, None)?;
                Ok(())
            }),
            1_000.0,
        );
        let result = s.run(flat_bars(&[100.0])).unwrap();
        assert_eq!(result.orders.len(), 2);
        assert!(result.orders.iter().all(|r| r.reason == RecordReason::Rejected));
        assert_eq!(result.final_account.balance("USDT").unwrap().free, 1_000.0);
    }

    #[test]
    fn failed_exec_leaves_account_untouched() {
        let s = session(
            StrategyModule::new("flaky").initialize(|_| Ok(())).handle_bar(|ctx, bar| {
                if bar.close > 105.0 {
                    return Err(StrategyError::msg("refusing to trade"));
                }
                ctx.order_buy("BTCUSDT", 1.0, None)?;
                Ok(())
            }),
            1_000.0,
        );
        let result = s.run(flat_bars(&[100.0, 110.0, 100.0])).unwrap();
        assert_eq!(result.failed_bars, 1);
        assert_eq!(result.fills().count(), 2);
        assert_eq!(result.final_account.net_quantity("BTCUSDT"), 2.0);
        assert_eq!(result.equity_curve.len(), 3);
    }

    #[test]
    fn cancel_removes_resting_order() {
        let s = session(
            StrategyModule::new("flip").initialize(|_| Ok(())).handle_bar(|ctx, _| {
                match ctx.incomplete_orders().first() {
                    Some(open) => {
                        ctx.cancel_order(open.unique_id.as_str())?;
                    }
                    None if ctx.completed_orders().is_empty() => {
                        ctx.order_buy("BTCUSDT", 1.0, Some(1.0))?;
                    }
                    None => {}
                }
                Ok(())
            }),
            1_000.0,
        );
        let result = s.run(flat_bars(&[100.0, 100.0, 100.0])).unwrap();
        let reasons: Vec<_> = result.orders.iter().map(|r| r.reason).collect();
        assert_eq!(reasons, vec![RecordReason::Submitted, RecordReason::Canceled]);
        assert_eq!(result.orders[1].order.status, OrderStatus::Canceled);
    }

    #[test]
    fn empty_bars_is_an_error() {
        let s = session(StrategyModule::new("x").initialize(|_| Ok(())), 1.0);
        assert!(matches!(s.run(Vec::new()), Err(ReplayError::EmptyBars)));
    }

    #[test]
    fn step_past_history_is_an_error() {
        let mut s = session(StrategyModule::new("x").initialize(|_| Ok(())), 100.0);
        let bars = flat_bars(&[100.0, 101.0]);
        assert!(matches!(s.step(&bars, 2), Err(ReplayError::BarIndex { index: 2, len: 2 })));
        assert!(matches!(s.step(&[], 0), Err(ReplayError::BarIndex { index: 0, len: 0 })));
        assert_eq!(s.account().net_value, 100.0);
        assert!(s.step(&bars, 1).is_ok());
    }
}
