//! Bar — the fundamental market data unit.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV bar for a single symbol and timeframe.
///
/// Times are milliseconds since the Unix epoch (UTC). `close_time` is the
/// instant the bar is considered final and is what the engine uses as "now"
/// when the bar drives an exec call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    /// Returns true if any OHLC field is NaN (void bar).
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic OHLCV sanity check: high >= low, high >= open, high >= close, etc.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
            && self.volume >= 0.0
            && self.close_time >= self.open_time
    }

    pub fn close_dt(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.close_time).single()
    }

    /// Absolute size of the candle body.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }
}
