//! Stratexec Runner — backtest replay on top of `stratexec-core`.
//!
//! - Synthetic OHLCV generation (market-aware, deterministic per seed)
//! - Bar-by-bar replay that threads account state between exec calls
//! - Spot fill accounting and resting limit/stop order matching
//! - Built-in demo strategies
//! - Visualization JSON and CSV export

pub mod accounting;
pub mod config;
pub mod export;
pub mod replay;
pub mod strategies;
pub mod synthetic;

pub use accounting::{apply_fill, mark_to_market, Fill, FillRejection};
pub use config::BacktestConfig;
pub use export::{export_json, export_orders_csv, save_artifacts, Statistics, VISUALIZATION_VERSION};
pub use replay::{run_backtest, BacktestResult, EquityPoint, OrderRecord, RecordReason, ReplayError, ReplaySession};
pub use strategies::builtin;
pub use synthetic::{generate_bars, SyntheticSpec};

use anyhow::{Context, Result};

/// Synthetic bars for `config`: `config.bars` bars of `config.timeframe`
/// starting at `config.start_date`.
pub fn synthetic_bars(config: &BacktestConfig) -> Result<Vec<stratexec_core::domain::Bar>> {
    let period = stratexec_core::domain::parse_timeframe(&config.timeframe)
        .with_context(|| format!("unrecognized timeframe '{}'", config.timeframe))?;
    let spec = SyntheticSpec {
        symbol: config.symbol.clone(),
        market: config.market()?,
        period,
        count: config.bars,
        start: config.start_time(),
        base_price: config.base_price,
        base_volatility: config.base_volatility,
        seed: config.seed,
    };
    Ok(generate_bars(&spec, &config.engine.load_calendar()))
}
