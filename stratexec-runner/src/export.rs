//! Visualization export — the dashboard JSON document and a CSV order tape.
//!
//! Prices are written as strings so the dashboard never sees float
//! formatting artifacts; timestamps are epoch milliseconds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::DateTime;
use serde::Serialize;
use stratexec_core::domain::{Bar, Order, OrderSide, OrderStatus};
use stratexec_core::exec::Decision;

use crate::replay::{BacktestResult, EquityPoint, OrderRecord};

pub const VISUALIZATION_VERSION: &str = "1.1.0";

#[derive(Debug, Serialize)]
pub struct VisualizationDoc<'a> {
    pub version: &'static str,
    pub metadata: Metadata<'a>,
    pub bars: Vec<BarRow>,
    pub orders: Vec<OrderRow<'a>>,
    pub decisions: &'a [Decision],
    pub statistics: Statistics,
    pub equity_curve: &'a [EquityPoint],
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    pub warnings: &'a [String],
}

#[derive(Debug, Serialize)]
pub struct Metadata<'a> {
    pub strategy_name: &'a str,
    pub symbol: &'a str,
    pub market_type: String,
    pub timeframe: &'a str,
    pub test_start_time: String,
    pub test_end_time: String,
    pub initial_cash: f64,
}

#[derive(Debug, Serialize)]
pub struct BarRow {
    pub timestamp: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
}

#[derive(Debug, Serialize)]
pub struct OrderRow<'a> {
    pub order_id: String,
    pub unique_id: &'a str,
    pub symbol: &'a str,
    pub direction: String,
    pub order_type: &'static str,
    pub price: String,
    pub quantity: String,
    pub timestamp: i64,
    pub bar_index: usize,
    pub status: String,
    pub trigger_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub total_bars: usize,
    pub total_orders: usize,
    pub buy_orders: usize,
    pub sell_orders: usize,
    pub filled_orders: usize,
    pub rejected_orders: usize,
    pub canceled_orders: usize,
    pub total_decisions: usize,
    pub failed_bars: usize,
    pub final_equity: f64,
    pub total_return: f64,
    pub realized_pnl: f64,
}

fn price(v: f64) -> String {
    format!("{v:.8}").trim_end_matches('0').trim_end_matches('.').to_string()
}

fn rfc3339(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms).map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn bar_row(bar: &Bar) -> BarRow {
    BarRow {
        timestamp: bar.open_time,
        open: price(bar.open),
        high: price(bar.high),
        low: price(bar.low),
        close: price(bar.close),
        volume: price(bar.volume),
    }
}

fn order_row(record: &OrderRecord) -> OrderRow<'_> {
    let order = &record.order;
    let shown_price = record
        .price
        .or(order.avg_fill_price)
        .or(order.kind.limit_price())
        .map(price)
        .unwrap_or_default();
    let mut trigger_reason = record.reason.as_str().to_string();
    if let Some(detail) = &record.detail {
        trigger_reason = format!("{trigger_reason}: {detail}");
    }
    OrderRow {
        order_id: order.order_id.as_ref().map(|id| id.to_string()).unwrap_or_default(),
        unique_id: order.unique_id.as_str(),
        symbol: &order.symbol,
        direction: order.side.to_string(),
        order_type: order.kind.name(),
        price: shown_price,
        quantity: price(order.quantity),
        timestamp: record.timestamp,
        bar_index: record.bar_index,
        status: order.status.to_string(),
        trigger_reason,
    }
}

/// Counts are per distinct order, keyed by `unique_id`, using each order's
/// last recorded state.
pub fn statistics(result: &BacktestResult) -> Statistics {
    let mut latest: BTreeMap<&str, &Order> = BTreeMap::new();
    for record in &result.orders {
        latest.insert(record.order.unique_id.as_str(), &record.order);
    }
    let count = |pred: &dyn Fn(&Order) -> bool| latest.values().filter(|o| pred(o)).count();
    Statistics {
        total_bars: result.bars.len(),
        total_orders: latest.len(),
        buy_orders: count(&|o: &Order| o.side == OrderSide::Buy),
        sell_orders: count(&|o: &Order| o.side == OrderSide::Sell),
        filled_orders: result.fills().count(),
        rejected_orders: count(&|o: &Order| o.status == OrderStatus::Rejected),
        canceled_orders: count(&|o: &Order| o.status == OrderStatus::Canceled),
        total_decisions: result.decisions.len(),
        failed_bars: result.failed_bars,
        final_equity: result.final_equity(),
        total_return: result.total_return(),
        realized_pnl: result.realized_pnl,
    }
}

pub fn visualization(result: &BacktestResult) -> VisualizationDoc<'_> {
    let (start, end) = match (result.bars.first(), result.bars.last()) {
        (Some(first), Some(last)) => (rfc3339(first.open_time), rfc3339(last.close_time)),
        _ => (String::new(), String::new()),
    };
    VisualizationDoc {
        version: VISUALIZATION_VERSION,
        metadata: Metadata {
            strategy_name: &result.strategy,
            symbol: &result.symbol,
            market_type: result.market.to_string(),
            timeframe: &result.timeframe,
            test_start_time: start,
            test_end_time: end,
            initial_cash: result.initial_cash,
        },
        bars: result.bars.iter().map(bar_row).collect(),
        orders: result.orders.iter().map(order_row).collect(),
        decisions: &result.decisions,
        statistics: statistics(result),
        equity_curve: &result.equity_curve,
        warnings: &result.warnings,
    }
}

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(&visualization(result)).context("failed to serialize visualization JSON")
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Order tape, one row per recorded order event.
pub fn export_orders_csv(result: &BacktestResult) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "bar_index",
        "timestamp",
        "order_id",
        "unique_id",
        "symbol",
        "direction",
        "order_type",
        "price",
        "quantity",
        "status",
        "trigger_reason",
    ])?;
    for record in &result.orders {
        let row = order_row(record);
        wtr.write_record([
            row.bar_index.to_string(),
            row.timestamp.to_string(),
            row.order_id,
            row.unique_id.to_string(),
            row.symbol.to_string(),
            row.direction,
            row.order_type.to_string(),
            row.price,
            row.quantity,
            row.status,
            row.trigger_reason,
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

pub fn export_equity_csv(curve: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["bar_index", "timestamp", "equity", "cash", "position"])?;
    for p in curve {
        wtr.write_record([
            p.bar_index.to_string(),
            p.timestamp.to_string(),
            format!("{:.2}", p.equity),
            format!("{:.2}", p.cash),
            price(p.position),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write `visualization.json`, `orders.csv` and `equity.csv` into
/// `{strategy}_{symbol}/` under `output_dir` and return that directory.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let run_dir = output_dir.join(format!("{}_{}", result.strategy, result.symbol.replace(['/', '\\'], "_")));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let files = [
        ("visualization.json", export_json(result)?),
        ("orders.csv", export_orders_csv(result)?),
        ("equity.csv", export_equity_csv(&result.equity_curve)?),
    ];
    for (name, content) in files {
        let path = run_dir.join(name);
        std::fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
    }
    tracing::info!(dir = %run_dir.display(), "artifacts saved");
    Ok(run_dir)
}
