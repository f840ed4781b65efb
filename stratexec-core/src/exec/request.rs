//! Exec request: the complete, self-contained input of one exec call.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Account, AccountError, Bar, ExecId, MarketType, MarketTypeError, Order};

/// Why the call was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
    MarketData,
    OrderStatus,
    RiskEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub event_type: String,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerDetail {
    /// Explicit trigger instant (ms since epoch, UTC).
    #[serde(default)]
    pub trigger_time: Option<i64>,
    /// Orders whose status changed (order-status triggers).
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub risk_event: Option<RiskEvent>,
}

/// Bars and aligned indicator series for one (symbol, timeframe).
///
/// Each indicator series is aligned to `bars` from the end: the last value
/// belongs to the last bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDataContext {
    pub symbol: String,
    pub timeframe: String,
    #[serde(default)]
    pub bars: Vec<Bar>,
    #[serde(default)]
    pub indicators: BTreeMap<String, Vec<Option<f64>>>,
}

impl MarketDataContext {
    pub fn new(symbol: impl Into<String>, timeframe: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
            bars,
            indicators: BTreeMap::new(),
        }
    }

    pub fn latest_bar(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Most recent non-missing value of the named indicator.
    pub fn latest_indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name)?.iter().rev().find_map(|v| *v)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("exec_id must not be empty")]
    EmptyExecId,

    #[error("max_timeout must be a positive, representable number of seconds, got {0}")]
    InvalidTimeout(f64),

    #[error("invalid account snapshot: {0}")]
    Account(#[from] AccountError),

    #[error(transparent)]
    MarketType(#[from] MarketTypeError),
}

/// One exec call's input. Immutable for the duration of the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub exec_id: ExecId,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub strategy_id: String,
    pub trigger: TriggerKind,
    #[serde(default)]
    pub trigger_detail: TriggerDetail,
    #[serde(default)]
    pub market_data: Vec<MarketDataContext>,
    #[serde(default)]
    pub account: Account,
    #[serde(default)]
    pub incomplete_orders: Vec<Order>,
    #[serde(default)]
    pub completed_orders: Vec<Order>,
    #[serde(default)]
    pub exchange: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Upper bound on wall-clock time for the call, in seconds.
    #[serde(default)]
    pub max_timeout: Option<f64>,
}

impl ExecRequest {
    /// A market-data request with no orders and an empty account.
    pub fn market_data(exec_id: impl Into<String>, market_data: Vec<MarketDataContext>) -> Self {
        Self {
            exec_id: ExecId::new(exec_id),
            account_id: String::new(),
            strategy_id: String::new(),
            trigger: TriggerKind::MarketData,
            trigger_detail: TriggerDetail::default(),
            market_data,
            account: Account::default(),
            incomplete_orders: Vec::new(),
            completed_orders: Vec::new(),
            exchange: String::new(),
            params: BTreeMap::new(),
            max_timeout: None,
        }
    }

    /// The trigger instant: explicit trigger time, else the close time of the
    /// last bar of the first market-data context.
    pub fn trigger_time(&self) -> Option<i64> {
        self.trigger_detail.trigger_time.or_else(|| {
            self.market_data.first().and_then(|m| m.latest_bar()).map(|b| b.close_time)
        })
    }

    pub fn primary_market_data(&self) -> Option<&MarketDataContext> {
        self.market_data.first()
    }

    /// First context for `symbol`, optionally restricted to `timeframe`.
    pub fn market_data_for(&self, symbol: &str, timeframe: Option<&str>) -> Option<&MarketDataContext> {
        self.market_data
            .iter()
            .find(|m| m.symbol == symbol && timeframe.map_or(true, |tf| m.timeframe == tf))
    }

    /// Explicit `market_type` parameter, if any.
    pub fn market_type_override(&self) -> Option<&str> {
        self.params.get("market_type").map(String::as_str)
    }

    pub fn market_type_for(&self, symbol: &str) -> Result<MarketType, MarketTypeError> {
        MarketType::resolve(symbol, self.market_type_override())
    }

    pub fn find_order(&self, id: &str) -> Option<&Order> {
        self.incomplete_orders
            .iter()
            .chain(self.completed_orders.iter())
            .find(|o| o.matches_id(id))
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if self.exec_id.0.trim().is_empty() {
            return Err(RequestError::EmptyExecId);
        }
        if let Some(t) = self.max_timeout {
            if timeout_duration(t).is_none() {
                return Err(RequestError::InvalidTimeout(t));
            }
        }
        self.account.validate()?;
        if let Some(explicit) = self.market_type_override() {
            explicit.parse::<MarketType>()?;
        }
        Ok(())
    }
}

/// Converts a timeout in seconds. `None` for NaN, non-positive, infinite or
/// out-of-range values.
pub fn timeout_duration(secs: f64) -> Option<Duration> {
    if secs.is_nan() || secs <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close_time: i64, close: f64) -> Bar {
        Bar {
            open_time: close_time - 59_999,
            close_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn trigger_time_falls_back_to_last_bar() {
        let md = MarketDataContext::new("BTCUSDT", "1m", vec![bar(60_000, 1.0), bar(120_000, 2.0)]);
        let mut req = ExecRequest::market_data("e1", vec![md]);
        assert_eq!(req.trigger_time(), Some(120_000));
        req.trigger_detail.trigger_time = Some(5);
        assert_eq!(req.trigger_time(), Some(5));
    }

    #[test]
    fn latest_indicator_skips_missing_tail() {
        let mut md = MarketDataContext::new("X", "1h", vec![]);
        md.indicators.insert("ma5".into(), vec![Some(1.0), Some(2.0), None]);
        assert_eq!(md.latest_indicator("ma5"), Some(2.0));
        assert_eq!(md.latest_indicator("rsi"), None);
    }

    #[test]
    fn validate_rejects_bad_inputs() {
        let mut req = ExecRequest::market_data("", vec![]);
        assert_eq!(req.validate(), Err(RequestError::EmptyExecId));
        req.exec_id = ExecId::new("e");
        req.max_timeout = Some(0.0);
        assert_eq!(req.validate(), Err(RequestError::InvalidTimeout(0.0)));
        req.max_timeout = Some(3.0);
        req.params.insert("market_type".into(), "mars".into());
        assert!(matches!(req.validate(), Err(RequestError::MarketType(_))));
        req.params.clear();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn validate_rejects_unrepresentable_timeouts() {
        let mut req = ExecRequest::market_data("e", vec![]);
        for t in [1e30, f64::INFINITY, f64::MAX, f64::NAN] {
            req.max_timeout = Some(t);
            assert!(matches!(req.validate(), Err(RequestError::InvalidTimeout(_))), "{t} accepted");
        }
        req.max_timeout = Some(86_400.0 * 365.0);
        assert!(req.validate().is_ok());
        assert_eq!(timeout_duration(1.5), Some(Duration::from_millis(1500)));
        assert_eq!(timeout_duration(1e30), None);
    }

    #[test]
    fn minimal_json_request_parses() {
        let json = r#"{"exec_id":"abc","trigger":"RISK_EVENT",
            "trigger_detail":{"risk_event":{"event_type":"MARGIN_CALL"}}}"#;
        let req: ExecRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.trigger, TriggerKind::RiskEvent);
        assert_eq!(req.trigger_detail.risk_event.unwrap().event_type, "MARGIN_CALL");
        assert!(req.market_data.is_empty());
    }
}
