//! Free-function API for strategy code that does not thread a [`Context`]
//! through every helper.
//!
//! Each function resolves the thread's active execution scope through the
//! registry and forwards to the matching [`Context`] method. Outside an exec
//! call they fail with [`RegistryError::NoActiveContext`].
//!
//! ```ignore
//! use stratexec_core::compat::*;
//!
//! fn rebalance(_: &Context) -> StrategyResult {
//!     let closes = history("BTCUSDT", 20, None)?;
//!     if closes.last().map(|b| b.close) > Some(42_000.0) {
//!         order_sell("BTCUSDT", 0.1, None)?;
//!     }
//!     log::info("rebalanced")?;
//!     Ok(())
//! }
//! ```

use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;

use crate::context::PriceQuery;
use crate::domain::{Bar, Order};
use crate::registry::{self, Attributes, ExecutionScope, RegistryError};
use crate::strategy::StrategyError;

pub use crate::context::Context;
pub use crate::strategy::StrategyResult;

fn with_scope<R>(f: impl FnOnce(&ExecutionScope) -> R) -> Result<R, RegistryError> {
    let scope = registry::current()?;
    Ok(f(&scope))
}

pub fn order_buy(symbol: &str, quantity: f64, price: Option<f64>) -> Result<Order, StrategyError> {
    Ok(with_scope(|s| s.context().order_buy(symbol, quantity, price))??)
}

pub fn order_sell(symbol: &str, quantity: f64, price: Option<f64>) -> Result<Order, StrategyError> {
    Ok(with_scope(|s| s.context().order_sell(symbol, quantity, price))??)
}

pub fn order_value(symbol: &str, value: f64, price: Option<f64>) -> Result<Order, StrategyError> {
    Ok(with_scope(|s| s.context().order_value(symbol, value, price))??)
}

pub fn order_target(symbol: &str, target: f64, price: Option<f64>) -> Result<Option<Order>, StrategyError> {
    Ok(with_scope(|s| s.context().order_target(symbol, target, price))??)
}

pub fn cancel_order(id: &str) -> Result<bool, StrategyError> {
    Ok(with_scope(|s| s.context().cancel_order(id))??)
}

pub fn history(symbol: &str, count: usize, timeframe: Option<&str>) -> Result<Vec<Bar>, StrategyError> {
    Ok(with_scope(|s| s.context().history(symbol, count, timeframe))?)
}

pub fn get_price(symbol: &str, query: &PriceQuery) -> Result<DataFrame, StrategyError> {
    Ok(with_scope(|s| s.context().get_price(symbol, query))??)
}

pub fn get_bars(symbol: &str, query: &PriceQuery) -> Result<DataFrame, StrategyError> {
    Ok(with_scope(|s| s.context().get_bars(symbol, query))??)
}

pub fn current_dt() -> Result<DateTime<Utc>, StrategyError> {
    Ok(with_scope(|s| s.context().current_dt())?)
}

/// Run `f` with mutable access to this call's `g` attribute bag.
pub fn with_g<R>(f: impl FnOnce(&mut Attributes) -> R) -> Result<R, StrategyError> {
    Ok(with_scope(|s| f(&mut *s.g_mut()))?)
}

/// Strategy logging through the active scope's logger.
pub mod log {
    use super::with_scope;
    use crate::log::LogLevel;
    use crate::strategy::StrategyError;

    pub fn write(level: LogLevel, msg: &str) -> Result<(), StrategyError> {
        Ok(with_scope(|s| s.log().write(level, msg))?)
    }

    pub fn debug(msg: &str) -> Result<(), StrategyError> {
        write(LogLevel::Debug, msg)
    }

    pub fn info(msg: &str) -> Result<(), StrategyError> {
        write(LogLevel::Info, msg)
    }

    pub fn warn(msg: &str) -> Result<(), StrategyError> {
        write(LogLevel::Warn, msg)
    }

    pub fn error(msg: &str) -> Result<(), StrategyError> {
        write(LogLevel::Error, msg)
    }

    pub fn set_level(module: &str, level: &str) -> Result<(), StrategyError> {
        Ok(with_scope(|s| s.log().set_level(module, level))?)
    }
}
