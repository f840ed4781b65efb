//! Account snapshot: balances, positions, and margin figures.
//!
//! Quantities are never negative; direction is carried by [`PositionSide`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

impl Balance {
    pub fn total(&self) -> f64 {
        self.free + self.locked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: f64,
    #[serde(default)]
    pub avg_cost: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub realized_pnl: f64,
    #[serde(default)]
    pub margin: f64,
}

impl Position {
    pub fn new_long(symbol: impl Into<String>, quantity: f64, avg_cost: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side: PositionSide::Long,
            quantity,
            avg_cost,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            margin: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity <= 1e-10
    }

    /// Quantity with sign: positive for long, negative for short.
    pub fn signed_quantity(&self) -> f64 {
        match self.side {
            PositionSide::Long => self.quantity,
            PositionSide::Short => -self.quantity,
        }
    }

    pub fn mark(&mut self, price: f64) {
        self.unrealized_pnl = self.signed_quantity() * (price - self.avg_cost);
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AccountError {
    #[error("position {symbol} has negative quantity {quantity}")]
    NegativeQuantity { symbol: String, quantity: f64 },

    #[error("balance {currency} has negative {field} amount {amount}")]
    NegativeBalance {
        currency: String,
        field: &'static str,
        amount: f64,
    },
}

/// Account snapshot delivered with each exec request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub balances: Vec<Balance>,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub net_value: f64,
    #[serde(default)]
    pub available_margin: f64,
    #[serde(default)]
    pub margin_ratio: f64,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
}

fn default_leverage() -> f64 {
    1.0
}

impl Account {
    /// A spot account holding only `amount` of `currency`.
    pub fn with_cash(currency: impl Into<String>, amount: f64) -> Self {
        Self {
            balances: vec![Balance { currency: currency.into(), free: amount, locked: 0.0 }],
            positions: Vec::new(),
            net_value: amount,
            available_margin: 0.0,
            margin_ratio: 0.0,
            risk_level: None,
            leverage: 1.0,
        }
    }

    /// Cash usable for new orders: available margin when the venue reports
    /// one, otherwise the sum of free balances.
    pub fn available_cash(&self) -> f64 {
        if self.available_margin > 0.0 {
            self.available_margin
        } else {
            self.balances.iter().map(|b| b.free).sum()
        }
    }

    pub fn balance(&self, currency: &str) -> Option<&Balance> {
        self.balances.iter().find(|b| b.currency == currency)
    }

    /// Mutable balance for `currency`, created empty if missing.
    pub fn balance_mut(&mut self, currency: &str) -> &mut Balance {
        let idx = match self.balances.iter().position(|b| b.currency == currency) {
            Some(idx) => idx,
            None => {
                self.balances.push(Balance { currency: currency.to_string(), free: 0.0, locked: 0.0 });
                self.balances.len() - 1
            }
        };
        &mut self.balances[idx]
    }

    pub fn position(&self, symbol: &str, side: PositionSide) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol && p.side == side && !p.is_flat())
    }

    pub fn position_mut(&mut self, symbol: &str, side: PositionSide) -> Option<&mut Position> {
        self.positions.iter_mut().find(|p| p.symbol == symbol && p.side == side)
    }

    /// Long quantity minus short quantity for `symbol`.
    pub fn net_quantity(&self, symbol: &str) -> f64 {
        self.positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .map(Position::signed_quantity)
            .sum()
    }

    /// Drop positions whose quantity has gone to zero.
    pub fn prune_flat(&mut self) {
        self.positions.retain(|p| !p.is_flat());
    }

    pub fn validate(&self) -> Result<(), AccountError> {
        for p in &self.positions {
            if p.quantity < 0.0 || p.quantity.is_nan() {
                return Err(AccountError::NegativeQuantity {
                    symbol: p.symbol.clone(),
                    quantity: p.quantity,
                });
            }
        }
        for b in &self.balances {
            for (field, amount) in [("free", b.free), ("locked", b.locked)] {
                if amount < 0.0 {
                    return Err(AccountError::NegativeBalance {
                        currency: b.currency.clone(),
                        field,
                        amount,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_account() -> Account {
        let mut account = Account::with_cash("USDT", 10_000.0);
        account.positions.push(Position::new_long("BTCUSDT", 0.5, 40_000.0));
        account.positions.push(Position {
            side: PositionSide::Short,
            ..Position::new_long("BTCUSDT", 0.2, 41_000.0)
        });
        account
    }

    #[test]
    fn available_cash_prefers_margin() {
        let mut account = sample_account();
        assert_eq!(account.available_cash(), 10_000.0);
        account.available_margin = 2_500.0;
        assert_eq!(account.available_cash(), 2_500.0);
    }

    #[test]
    fn net_quantity_nets_long_and_short() {
        let account = sample_account();
        assert!((account.net_quantity("BTCUSDT") - 0.3).abs() < 1e-12);
        assert_eq!(account.net_quantity("ETHUSDT"), 0.0);
    }

    #[test]
    fn balance_mut_creates_missing_currency() {
        let mut account = sample_account();
        account.balance_mut("BTC").free += 1.0;
        assert_eq!(account.balance("BTC").unwrap().free, 1.0);
        assert_eq!(account.balances.len(), 2);
    }

    #[test]
    fn validate_rejects_negative_quantity() {
        let mut account = sample_account();
        account.positions[0].quantity = -1.0;
        assert!(matches!(account.validate(), Err(AccountError::NegativeQuantity { .. })));
    }

    #[test]
    fn mark_updates_unrealized_pnl_by_side() {
        let mut long = Position::new_long("X", 2.0, 100.0);
        long.mark(110.0);
        assert_eq!(long.unrealized_pnl, 20.0);
        let mut short = Position { side: PositionSide::Short, ..Position::new_long("X", 2.0, 100.0) };
        short.mark(110.0);
        assert_eq!(short.unrealized_pnl, -20.0);
    }

    #[test]
    fn leverage_defaults_to_one() {
        let account: Account = serde_json::from_str("{}").unwrap();
        assert_eq!(account.leverage, 1.0);
        assert!(account.positions.is_empty());
    }
}
