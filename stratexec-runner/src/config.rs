//! Serializable backtest configuration.
//!
//! ```toml
//! strategy = "ma_cross"
//! symbol = "BTCUSDT"
//! timeframe = "1h"
//! bars = 500
//! seed = 7
//! start_date = "2024-01-01"
//! initial_cash = 10000.0
//!
//! [params]
//! fast = "5"
//! slow = "20"
//!
//! [engine]
//! schedule_tolerance_minutes = 60
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use stratexec_core::domain::{parse_timeframe, MarketType};
use stratexec_core::EngineConfig;

/// Everything needed to reproduce one backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Built-in strategy name (see [`crate::strategies::builtin`]).
    pub strategy: String,
    pub symbol: String,
    pub timeframe: String,
    /// Number of synthetic bars when no bar file is given.
    pub bars: usize,
    pub seed: u64,
    /// First bar opens at midnight UTC of this date.
    pub start_date: NaiveDate,
    pub initial_cash: f64,
    pub quote_currency: String,
    /// Flat commission as a fraction of notional.
    pub commission_rate: f64,
    pub base_price: f64,
    /// Per-bar volatility before the market-type multiplier.
    pub base_volatility: f64,
    /// Overrides suffix detection (`CRYPTO`, `US_STOCK`, ...).
    pub market_type: Option<String>,
    /// Passed to the strategy as request parameters.
    pub params: BTreeMap<String, String>,
    pub engine: EngineConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            strategy: "ma_cross".to_string(),
            symbol: "BTCUSDT".to_string(),
            timeframe: "1h".to_string(),
            bars: 100,
            seed: 42,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            initial_cash: 10_000.0,
            quote_currency: "USDT".to_string(),
            commission_rate: 0.0,
            base_price: 100.0,
            base_volatility: 0.002,
            market_type: None,
            params: BTreeMap::new(),
            engine: EngineConfig::default(),
        }
    }
}

impl BacktestConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("failed to parse backtest config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read backtest config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            bail!("symbol must not be empty");
        }
        if parse_timeframe(&self.timeframe).is_none() {
            bail!("unrecognized timeframe '{}'", self.timeframe);
        }
        if !(self.initial_cash.is_finite() && self.initial_cash > 0.0) {
            bail!("initial_cash must be positive, got {}", self.initial_cash);
        }
        if !(0.0..1.0).contains(&self.commission_rate) {
            bail!("commission_rate must be in [0, 1), got {}", self.commission_rate);
        }
        if !(self.base_price.is_finite() && self.base_price > 0.0) {
            bail!("base_price must be positive, got {}", self.base_price);
        }
        if !(self.base_volatility.is_finite() && self.base_volatility > 0.0) {
            bail!("base_volatility must be positive, got {}", self.base_volatility);
        }
        self.market()?;
        self.engine.validate()?;
        Ok(())
    }

    pub fn market(&self) -> Result<MarketType> {
        Ok(MarketType::resolve(&self.symbol, self.market_type.as_deref())?)
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_date.and_time(chrono::NaiveTime::MIN).and_utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(BacktestConfig::from_toml("").unwrap(), BacktestConfig::default());
    }

    #[test]
    fn parses_params_and_engine_section() {
        let cfg = BacktestConfig::from_toml(
            r#"
            symbol = "AAPL.US"
            timeframe = "1d"
            bars = 250
            start_date = "2024-03-01"

            [params]
            fast = "3"

            [engine]
            default_timeout_secs = 1.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.bars, 250);
        assert_eq!(cfg.params["fast"], "3");
        assert_eq!(cfg.engine.default_timeout_secs, Some(1.5));
        assert!(!cfg.market().unwrap().is_continuous());
        assert_eq!(cfg.start_time().to_rfc3339(), "2024-03-01T00:00:00+00:00");
    }

    #[test]
    fn rejects_bad_values() {
        assert!(BacktestConfig::from_toml("timeframe = \"fortnight\"").is_err());
        assert!(BacktestConfig::from_toml("initial_cash = 0.0").is_err());
        assert!(BacktestConfig::from_toml("market_type = \"MOON\"").is_err());
        assert!(BacktestConfig::from_toml("commission_rate = 1.5").is_err());
    }
}
