//! Spot account updates for the backtest driver.
//!
//! Applies fills to an [`Account`]: buys move quote cash into a long
//! position (averaging the cost), sells reduce it and realize PnL. Short
//! selling is not simulated; a sell beyond the held quantity and a buy beyond
//! free cash are rejected before anything changes.

use stratexec_core::domain::{Account, OrderSide, Position, PositionSide};
use thiserror::Error;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
}

impl Fill {
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum FillRejection {
    #[error("insufficient cash: need {needed:.2}, have {available:.2}")]
    InsufficientCash { needed: f64, available: f64 },

    #[error("insufficient position in {symbol}: selling {requested}, holding {held}")]
    InsufficientPosition { symbol: String, requested: f64, held: f64 },
}

/// Check `fill` against `account` without applying it.
pub fn check_fill(account: &Account, currency: &str, fill: &Fill) -> Result<(), FillRejection> {
    match fill.side {
        OrderSide::Buy => {
            let needed = fill.notional() + fill.commission;
            let available = account.balance(currency).map_or(0.0, |b| b.free);
            if needed > available + EPSILON {
                return Err(FillRejection::InsufficientCash { needed, available });
            }
        }
        OrderSide::Sell => {
            let held = account.position(&fill.symbol, PositionSide::Long).map_or(0.0, |p| p.quantity);
            if fill.quantity > held + EPSILON {
                return Err(FillRejection::InsufficientPosition {
                    symbol: fill.symbol.clone(),
                    requested: fill.quantity,
                    held,
                });
            }
        }
    }
    Ok(())
}

/// Apply `fill`, returning the PnL it realized net of commission. A buy
/// realizes only its commission.
pub fn apply_fill(account: &mut Account, currency: &str, fill: &Fill) -> Result<f64, FillRejection> {
    check_fill(account, currency, fill)?;
    let realized = match fill.side {
        OrderSide::Buy => {
            account.balance_mut(currency).free -= fill.notional() + fill.commission;
            match account.position_mut(&fill.symbol, PositionSide::Long) {
                Some(pos) if !pos.is_flat() => {
                    let total_cost = pos.avg_cost * pos.quantity + fill.notional();
                    pos.quantity += fill.quantity;
                    pos.avg_cost = total_cost / pos.quantity;
                }
                Some(pos) => *pos = Position::new_long(fill.symbol.clone(), fill.quantity, fill.price),
                None => account
                    .positions
                    .push(Position::new_long(fill.symbol.clone(), fill.quantity, fill.price)),
            }
            -fill.commission
        }
        OrderSide::Sell => {
            account.balance_mut(currency).free += fill.notional() - fill.commission;
            let mut realized = -fill.commission;
            if let Some(pos) = account.position_mut(&fill.symbol, PositionSide::Long) {
                let sold = fill.quantity.min(pos.quantity);
                let pnl = (fill.price - pos.avg_cost) * sold;
                pos.realized_pnl += pnl;
                pos.quantity -= sold;
                realized += pnl;
            }
            account.prune_flat();
            realized
        }
    };
    Ok(realized)
}

/// Mark every position in `symbol` at `price` and refresh `net_value`.
pub fn mark_to_market(account: &mut Account, symbol: &str, price: f64) {
    for pos in account.positions.iter_mut().filter(|p| p.symbol == symbol) {
        pos.mark(price);
    }
    account.net_value = equity(account, |s| (s == symbol).then_some(price));
}

/// Cash plus positions valued at `price_of(symbol)`, falling back to cost.
pub fn equity(account: &Account, price_of: impl Fn(&str) -> Option<f64>) -> f64 {
    let cash: f64 = account.balances.iter().map(|b| b.total()).sum();
    let holdings: f64 = account
        .positions
        .iter()
        .map(|p| p.signed_quantity() * price_of(&p.symbol).unwrap_or(p.avg_cost))
        .sum();
    cash + holdings
}
