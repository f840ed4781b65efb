//! Synthetic OHLCV generation for backtests without a bar file.
//!
//! Bars follow a persistent random walk: the candle direction continues the
//! previous one 65% of the time, about a quarter of bars open with a gap,
//! wicks are 0.3–0.8× the body and volume grows with the body size.
//! Continuous markets get a larger volatility multiplier than session
//! markets. Output is deterministic per (seed, symbol).

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use stratexec_core::domain::{Bar, MarketType};
use stratexec_core::rng::RngHierarchy;
use stratexec_core::scheduler::{market_time, TradeCalendar};

const SESSION_VOL_MULTIPLIER: f64 = 4.5;
const CONTINUOUS_VOL_MULTIPLIER: f64 = 8.0;
const GAP_PROBABILITY: f64 = 0.25;
const CONTINUATION_PROBABILITY: f64 = 0.65;
const BASE_VOLUME: f64 = 1_000.0;

#[derive(Debug, Clone)]
pub struct SyntheticSpec {
    pub symbol: String,
    pub market: MarketType,
    pub period: Duration,
    pub count: usize,
    pub start: DateTime<Utc>,
    pub base_price: f64,
    pub base_volatility: f64,
    pub seed: u64,
}

impl SyntheticSpec {
    fn sigma(&self) -> f64 {
        let multiplier = if self.market.is_continuous() {
            CONTINUOUS_VOL_MULTIPLIER
        } else {
            SESSION_VOL_MULTIPLIER
        };
        self.base_volatility * multiplier
    }
}

/// Generate `spec.count` consecutive bars. Session markets skip bars that
/// open on a non-trading day.
pub fn generate_bars(spec: &SyntheticSpec, calendar: &TradeCalendar) -> Vec<Bar> {
    let mut rng = RngHierarchy::new(spec.seed).rng_for(&spec.symbol, 0);
    let sigma = spec.sigma();
    let period_ms = spec.period.num_milliseconds().max(1);

    let mut bars = Vec::with_capacity(spec.count);
    let mut open_time = spec.start.timestamp_millis();
    let mut prev_close = spec.base_price;
    let mut direction: f64 = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };

    while bars.len() < spec.count {
        let slot_start = open_time;
        open_time += period_ms;
        if !spec.market.is_continuous() && !opens_on_trading_day(spec.market, slot_start, calendar) {
            continue;
        }

        if !rng.gen_bool(CONTINUATION_PROBABILITY) {
            direction = -direction;
        }
        let bar = next_bar(&mut rng, prev_close, direction, sigma, slot_start, period_ms);
        prev_close = bar.close;
        bars.push(bar);
    }

    tracing::debug!(symbol = %spec.symbol, count = bars.len(), market = %spec.market, "synthetic bars generated");
    bars
}

fn opens_on_trading_day(market: MarketType, open_ms: i64, calendar: &TradeCalendar) -> bool {
    match DateTime::<Utc>::from_timestamp_millis(open_ms) {
        Some(at) => calendar.is_trading_day(market, market_time::local_date(market, at)),
        None => false,
    }
}

fn next_bar(rng: &mut StdRng, prev_close: f64, direction: f64, sigma: f64, open_time: i64, period_ms: i64) -> Bar {
    let open = if rng.gen_bool(GAP_PROBABILITY) {
        let gap = rng.gen_range(0.2..1.0) * sigma * prev_close;
        (prev_close + direction * gap).max(prev_close * 0.5)
    } else {
        prev_close
    };

    let body = rng.gen_range(0.1..1.5) * sigma * open;
    let close = (open + direction * body).max(open * 0.5);
    // Doji bars still get visible wicks.
    let wick_base = (close - open).abs().max(open * sigma * 0.05);
    let upper = wick_base * rng.gen_range(0.3..=0.8);
    let lower = wick_base * rng.gen_range(0.3..=0.8);

    let top = open.max(close);
    let bottom = open.min(close);
    let high = top + upper;
    let low = (bottom - lower).max(bottom * 0.5);

    let body_ratio = (close - open).abs() / (open * sigma);
    let volume = BASE_VOLUME * (0.5 + rng.gen_range(0.0..0.5) + body_ratio);

    Bar {
        open_time,
        close_time: open_time + period_ms - 1,
        open,
        high,
        low,
        close,
        volume,
    }
}
