//! Execution context — the per-call façade strategies trade through.
//!
//! A [`Context`] is built from one [`ExecRequest`] and lives exactly as long
//! as the exec call. Reads come straight from the request snapshot; order
//! operations append intents to the call's [`OrderCollector`]. Interior
//! mutability keeps every method on `&self` so the context can be shared
//! through the thread-local registry.

pub mod collector;
pub mod frame;

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use polars::prelude::{DataFrame, PolarsError};
use thiserror::Error;

use crate::domain::{
    Account, Bar, ExecId, MarketType, Order, OrderKind, OrderSide, OrderStatus, PositionSide,
    TimeInForce, UniqueId,
};
use crate::exec::{Decision, ExecRequest, OrderOp, OrderOpEvent, TriggerKind};
use crate::registry::Attributes;

pub use collector::OrderCollector;
pub use frame::{bars_to_frame, PriceQuery};

const QUANTITY_EPSILON: f64 = 1e-8;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("invalid quantity {quantity} for {symbol}")]
    InvalidQuantity { symbol: String, quantity: f64 },

    #[error("invalid price {price} for {symbol}")]
    InvalidPrice { symbol: String, price: f64 },

    #[error("no price available for {0}: pass an explicit price")]
    UnknownPrice(String),

    #[error("cannot modify order {id}: {reason}")]
    UnsupportedModify { id: String, reason: String },

    #[error("conflicting arguments: frequency '{frequency}' vs unit '{unit}'")]
    ConflictingFrequency { frequency: String, unit: String },

    #[error("execution exceeded its {timeout_ms} ms deadline")]
    DeadlineExceeded { timeout_ms: u128 },

    #[error("failed to build frame: {0}")]
    Frame(#[from] PolarsError),
}

/// A new order as requested by strategy code.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: f64,
    pub unique_id: Option<UniqueId>,
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            quantity,
            unique_id: None,
            time_in_force: TimeInForce::Gtc,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: f64, limit_price: f64) -> Self {
        Self { kind: OrderKind::Limit { limit_price }, ..Self::market(symbol, side, quantity) }
    }

    pub fn with_kind(mut self, kind: OrderKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_unique_id(mut self, id: impl Into<String>) -> Self {
        self.unique_id = Some(UniqueId::new(id));
        self
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }
}

/// What the call produced, drained from the context after callbacks return.
#[derive(Debug, Default)]
pub struct ContextOutput {
    pub events: Vec<OrderOpEvent>,
    pub warnings: Vec<String>,
    pub decisions: Vec<Decision>,
}

pub struct Context {
    request: ExecRequest,
    settings: RefCell<Attributes>,
    now_ms: i64,
    started: Instant,
    timeout: Option<Duration>,
    collector: RefCell<OrderCollector>,
    warnings: RefCell<Vec<String>>,
    decisions: RefCell<Vec<Decision>>,
    next_seq: Cell<u64>,
}

impl Context {
    /// Build a context for `request`. `settings` is the loaded strategy's
    /// one-time setup output; `timeout` bounds the call's wall-clock time.
    pub fn new(request: ExecRequest, settings: Attributes, timeout: Option<Duration>) -> Self {
        let now_ms = request.trigger_time().unwrap_or_else(|| Utc::now().timestamp_millis());
        Self {
            request,
            settings: RefCell::new(settings),
            now_ms,
            started: Instant::now(),
            timeout,
            collector: RefCell::new(OrderCollector::new()),
            warnings: RefCell::new(Vec::new()),
            decisions: RefCell::new(Vec::new()),
            next_seq: Cell::new(0),
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn request(&self) -> &ExecRequest {
        &self.request
    }

    pub fn exec_id(&self) -> &ExecId {
        &self.request.exec_id
    }

    pub fn trigger(&self) -> TriggerKind {
        self.request.trigger
    }

    pub fn account(&self) -> &Account {
        &self.request.account
    }

    pub fn exchange(&self) -> &str {
        &self.request.exchange
    }

    pub fn incomplete_orders(&self) -> &[Order] {
        &self.request.incomplete_orders
    }

    pub fn completed_orders(&self) -> &[Order] {
        &self.request.completed_orders
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.request.params
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.request.params.get(key).map(String::as_str)
    }

    /// Parameter parsed as a number, if present and numeric.
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.param(key)?.trim().parse().ok()
    }

    /// Value stored by the strategy's one-time setup.
    pub fn setting(&self, key: &str) -> Option<serde_json::Value> {
        self.settings.borrow().get(key).cloned()
    }

    pub fn setting_f64(&self, key: &str) -> Option<f64> {
        self.setting(key)?.as_f64()
    }

    /// Replace the settings snapshot once setup has run during this call.
    pub(crate) fn set_settings(&self, settings: Attributes) {
        *self.settings.borrow_mut() = settings;
    }

    /// Trigger instant in ms since epoch.
    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn current_dt(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.now_ms).single().unwrap_or_default()
    }

    /// Market type of `symbol`, honouring the `market_type` parameter.
    pub fn market_type(&self, symbol: &str) -> MarketType {
        self.request
            .market_type_for(symbol)
            .unwrap_or_else(|_| MarketType::detect(symbol))
    }

    pub fn available_cash(&self) -> f64 {
        self.request.account.available_cash()
    }

    pub fn position_quantity(&self, symbol: &str, side: PositionSide) -> f64 {
        self.request.account.position(symbol, side).map_or(0.0, |p| p.quantity)
    }

    // ── Market data ──────────────────────────────────────────────────

    /// Latest bar of the first context for `symbol`.
    pub fn current_bar(&self, symbol: &str) -> Option<&Bar> {
        self.request.market_data_for(symbol, None)?.latest_bar()
    }

    pub fn latest_price(&self, symbol: &str) -> Option<f64> {
        self.current_bar(symbol).map(|b| b.close)
    }

    /// The most recent `count` bars (oldest first). Short or missing history
    /// returns what exists and records a warning.
    pub fn history(&self, symbol: &str, count: usize, timeframe: Option<&str>) -> Vec<Bar> {
        let Some(md) = self.request.market_data_for(symbol, timeframe) else {
            self.warn(format!(
                "no market data for {symbol}{}",
                timeframe.map(|tf| format!(" ({tf})")).unwrap_or_default()
            ));
            return Vec::new();
        };
        let bars = &md.bars;
        if bars.len() < count {
            self.warn(format!(
                "requested {count} bars for {symbol} {}, only {} available",
                md.timeframe,
                bars.len()
            ));
        }
        bars[bars.len().saturating_sub(count)..].to_vec()
    }

    pub fn history_frame(
        &self,
        symbol: &str,
        count: usize,
        timeframe: Option<&str>,
    ) -> Result<DataFrame, ContextError> {
        Ok(bars_to_frame(&self.history(symbol, count, timeframe))?)
    }

    /// Closing prices of the most recent `count` bars.
    pub fn closes(&self, symbol: &str, count: usize, timeframe: Option<&str>) -> Vec<f64> {
        self.history(symbol, count, timeframe).iter().map(|b| b.close).collect()
    }

    pub fn indicator(&self, symbol: &str, timeframe: Option<&str>, name: &str) -> Option<f64> {
        self.request.market_data_for(symbol, timeframe)?.latest_indicator(name)
    }

    /// `get_price`: `count` bars as a frame, restricted to `fields`.
    pub fn get_price(&self, symbol: &str, query: &PriceQuery) -> Result<DataFrame, ContextError> {
        for w in query.ignored_parameter_warnings() {
            self.warn(w);
        }
        let df = self.history_frame(symbol, query.count, query.frequency.as_deref())?;
        let (df, unknown) = frame::select_fields(df, query.fields.as_deref())?;
        if !unknown.is_empty() {
            self.warn(format!(
                "unknown fields {unknown:?} for {symbol}; returning all columns"
            ));
        }
        Ok(df)
    }

    /// `get_bars`: like [`Context::get_price`] with `unit` accepted as an
    /// alias of `frequency`.
    pub fn get_bars(&self, symbol: &str, query: &PriceQuery) -> Result<DataFrame, ContextError> {
        let frequency = match (&query.frequency, &query.unit) {
            (Some(f), Some(u)) if f != u => {
                return Err(ContextError::ConflictingFrequency {
                    frequency: f.clone(),
                    unit: u.clone(),
                })
            }
            (Some(f), _) => Some(f.clone()),
            (None, u) => u.clone(),
        };
        let resolved = PriceQuery { frequency, unit: None, ..query.clone() };
        self.get_price(symbol, &resolved)
    }

    // ── Order operations ─────────────────────────────────────────────

    /// Buy `quantity`; a limit order if `price` is given, otherwise market.
    pub fn order_buy(&self, symbol: &str, quantity: f64, price: Option<f64>) -> Result<Order, ContextError> {
        self.submit_order(simple_request(symbol, OrderSide::Buy, quantity, price))
    }

    pub fn order_sell(&self, symbol: &str, quantity: f64, price: Option<f64>) -> Result<Order, ContextError> {
        self.submit_order(simple_request(symbol, OrderSide::Sell, quantity, price))
    }

    /// Queue a create intent and return the placeholder order (status NEW,
    /// no venue id). A `unique_id` that was already seen returns the existing
    /// order without queueing anything.
    pub fn submit_order(&self, req: OrderRequest) -> Result<Order, ContextError> {
        self.check_deadline()?;
        if !(req.quantity.is_finite() && req.quantity > 0.0) {
            return Err(ContextError::InvalidQuantity { symbol: req.symbol, quantity: req.quantity });
        }
        if !req.kind.prices_valid() {
            let price = req.kind.limit_price().or(req.kind.stop_price()).unwrap_or(f64::NAN);
            return Err(ContextError::InvalidPrice { symbol: req.symbol, price });
        }

        if let Some(id) = &req.unique_id {
            if let Some(existing) = self.find_known_order(id.as_str()) {
                self.warn(format!("duplicate unique_id {id}: returning existing order"));
                return Ok(existing);
            }
        }

        let unique_id = match req.unique_id {
            Some(id) => id,
            None => self.next_unique_id(),
        };
        let mut order = Order::new(unique_id, req.symbol, req.side, req.kind, req.quantity, self.now_ms);
        order.time_in_force = req.time_in_force;
        tracing::debug!(
            exec_id = %self.exec_id(),
            unique_id = %order.unique_id,
            side = %order.side,
            kind = order.kind.name(),
            quantity = order.quantity,
            "order create queued"
        );
        self.collector.borrow_mut().push(OrderOp::Create, order.clone());
        Ok(order)
    }

    /// Queue a cancel for an incomplete order or one created earlier in this
    /// call. Returns false when `id` matches neither.
    pub fn cancel_order(&self, id: &str) -> Result<bool, ContextError> {
        self.check_deadline()?;
        if self.collector.borrow().has_cancel(id) {
            return Ok(true);
        }
        let Some(mut order) = self.find_open_order(id) else {
            self.warn(format!("cancel_order: no open order {id}"));
            return Ok(false);
        };
        // Best effort: the venue decides the final state.
        if order.transition(OrderStatus::PendingCancel, self.now_ms).is_err() {
            return Ok(false);
        }
        self.collector.borrow_mut().push(OrderOp::Cancel, order);
        Ok(true)
    }

    /// Queue a modify of quantity and/or price. Returns false when `id`
    /// matches no open order.
    pub fn modify_order(
        &self,
        id: &str,
        quantity: Option<f64>,
        price: Option<f64>,
    ) -> Result<bool, ContextError> {
        self.check_deadline()?;
        let Some(mut order) = self.find_open_order(id) else {
            self.warn(format!("modify_order: no open order {id}"));
            return Ok(false);
        };
        if let Some(q) = quantity {
            if !(q.is_finite() && q > order.executed_size) {
                return Err(ContextError::InvalidQuantity { symbol: order.symbol, quantity: q });
            }
            order.quantity = q;
        }
        if let Some(p) = price {
            if !(p.is_finite() && p > 0.0) {
                return Err(ContextError::InvalidPrice { symbol: order.symbol, price: p });
            }
            order.kind = match order.kind {
                OrderKind::Market => {
                    return Err(ContextError::UnsupportedModify {
                        id: id.to_string(),
                        reason: "market orders carry no price".to_string(),
                    })
                }
                OrderKind::Limit { .. } => OrderKind::Limit { limit_price: p },
                OrderKind::StopMarket { .. } => OrderKind::StopMarket { stop_price: p },
                OrderKind::StopLimit { stop_price, .. } => OrderKind::StopLimit { stop_price, limit_price: p },
            };
        }
        order.updated_at = self.now_ms;
        self.collector.borrow_mut().push(OrderOp::Modify, order);
        Ok(true)
    }

    /// Buy `value` worth of `symbol`. Price defaults to the current close;
    /// quantity is rounded down to whole units on session markets.
    pub fn order_value(&self, symbol: &str, value: f64, price: Option<f64>) -> Result<Order, ContextError> {
        let reference = self.resolve_price(symbol, price)?;
        let mut quantity = value / reference;
        if self.market_type(symbol).trades_whole_units() {
            quantity = quantity.floor();
        }
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(ContextError::InvalidQuantity { symbol: symbol.to_string(), quantity });
        }
        self.order_buy(symbol, quantity, price)
    }

    /// Trade towards a net position of `target`. Emits at most one order;
    /// nothing when already at target.
    pub fn order_target(
        &self,
        symbol: &str,
        target: f64,
        price: Option<f64>,
    ) -> Result<Option<Order>, ContextError> {
        if !target.is_finite() {
            return Err(ContextError::InvalidQuantity { symbol: symbol.to_string(), quantity: target });
        }
        let current = self.request.account.net_quantity(symbol);
        let mut diff = target - current;
        if self.market_type(symbol).trades_whole_units() {
            diff = diff.trunc();
        }
        if diff.abs() < QUANTITY_EPSILON {
            return Ok(None);
        }
        let order = if diff > 0.0 {
            self.order_buy(symbol, diff, price)?
        } else {
            self.order_sell(symbol, diff.abs(), price)?
        };
        Ok(Some(order))
    }

    // ── Annotations ──────────────────────────────────────────────────

    pub fn record_decision(&self, decision: Decision) {
        self.decisions.borrow_mut().push(decision);
    }

    pub fn warn(&self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::warn!(exec_id = %self.request.exec_id, "{msg}");
        self.warnings.borrow_mut().push(msg);
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.borrow().clone()
    }

    pub fn collected_len(&self) -> usize {
        self.collector.borrow().len()
    }

    // ── Deadline ─────────────────────────────────────────────────────

    pub fn deadline_exceeded(&self) -> bool {
        self.timeout.is_some_and(|t| self.started.elapsed() > t)
    }

    pub fn check_deadline(&self) -> Result<(), ContextError> {
        match self.timeout {
            Some(t) if self.started.elapsed() > t => {
                Err(ContextError::DeadlineExceeded { timeout_ms: t.as_millis() })
            }
            _ => Ok(()),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Take everything the call produced, leaving the context empty.
    pub fn drain(&self) -> ContextOutput {
        ContextOutput {
            events: std::mem::take(&mut *self.collector.borrow_mut()).into_events(),
            warnings: std::mem::take(&mut *self.warnings.borrow_mut()),
            decisions: std::mem::take(&mut *self.decisions.borrow_mut()),
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    fn next_unique_id(&self) -> UniqueId {
        loop {
            let seq = self.next_seq.get();
            self.next_seq.set(seq + 1);
            let id = UniqueId::derive(&self.request.exec_id, seq);
            if self.find_known_order(id.as_str()).is_none() {
                return id;
            }
        }
    }

    fn find_known_order(&self, id: &str) -> Option<Order> {
        if let Some(order) = self.collector.borrow().find_created(id) {
            return Some(order.clone());
        }
        self.request.find_order(id).cloned()
    }

    fn find_open_order(&self, id: &str) -> Option<Order> {
        if let Some(order) = self.collector.borrow().find_created(id) {
            return Some(order.clone());
        }
        self.request
            .incomplete_orders
            .iter()
            .find(|o| o.is_active() && o.matches_id(id))
            .cloned()
    }

    fn resolve_price(&self, symbol: &str, price: Option<f64>) -> Result<f64, ContextError> {
        let price = match price {
            Some(p) => p,
            None => self
                .latest_price(symbol)
                .ok_or_else(|| ContextError::UnknownPrice(symbol.to_string()))?,
        };
        if !(price.is_finite() && price > 0.0) {
            return Err(ContextError::InvalidPrice { symbol: symbol.to_string(), price });
        }
        Ok(price)
    }
}

fn simple_request(symbol: &str, side: OrderSide, quantity: f64, price: Option<f64>) -> OrderRequest {
    match price {
        Some(p) => OrderRequest::limit(symbol, side, quantity, p),
        None => OrderRequest::market(symbol, side, quantity),
    }
}
