//! Order types and the order status state machine.

use super::ids::{OrderId, UniqueId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// What kind of order and its price parameters.
///
/// Prices live inside the variant, so a limit-bearing kind always has a
/// limit price and a stop-bearing kind always has a stop price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    /// Fill at the prevailing price.
    Market,
    /// Fill at limit price or better.
    Limit { limit_price: f64 },
    /// Triggers when price reaches the stop level, then fills as market.
    StopMarket { stop_price: f64 },
    /// Triggers at stop_price, then becomes a limit order at limit_price.
    StopLimit { stop_price: f64, limit_price: f64 },
}

impl OrderKind {
    pub fn limit_price(&self) -> Option<f64> {
        match *self {
            OrderKind::Limit { limit_price } | OrderKind::StopLimit { limit_price, .. } => {
                Some(limit_price)
            }
            _ => None,
        }
    }

    pub fn stop_price(&self) -> Option<f64> {
        match *self {
            OrderKind::StopMarket { stop_price } | OrderKind::StopLimit { stop_price, .. } => {
                Some(stop_price)
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrderKind::Market => "MARKET",
            OrderKind::Limit { .. } => "LIMIT",
            OrderKind::StopMarket { .. } => "STOP_MARKET",
            OrderKind::StopLimit { .. } => "STOP_LIMIT",
        }
    }

    /// Every price parameter is finite and strictly positive.
    pub fn prices_valid(&self) -> bool {
        [self.limit_price(), self.stop_price()]
            .into_iter()
            .flatten()
            .all(|p| p.is_finite() && p > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    #[default]
    Gtc,
    Ioc,
    Fok,
    Day,
}

/// Order lifecycle states.
///
/// ```text
/// NEW ──► PARTIALLY_FILLED ──► FILLED
///  │            │
///  ├────────────┴──► CANCELED | REJECTED | EXPIRED
///  └────────────┴──► PENDING_CANCEL ──► CANCELED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
    PendingCancel,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match self {
            New | PartiallyFilled => matches!(
                next,
                PartiallyFilled | Filled | Canceled | Rejected | Expired | PendingCancel
            ),
            PendingCancel => next == Canceled,
            Filled | Canceled | Rejected | Expired => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::PendingCancel => "PENDING_CANCEL",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum OrderError {
    #[error("order {unique_id}: invalid status transition {from} -> {to}")]
    InvalidTransition {
        unique_id: UniqueId,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("order {unique_id}: fill of {fill} exceeds remaining {remaining}")]
    Overfill {
        unique_id: UniqueId,
        fill: f64,
        remaining: f64,
    },

    #[error("order {unique_id}: fill quantity must be positive, got {fill}")]
    NonPositiveFill { unique_id: UniqueId, fill: f64 },
}

/// A single order as seen by strategies and venues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub unique_id: UniqueId,
    #[serde(default)]
    pub order_id: Option<OrderId>,
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: f64,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    pub status: OrderStatus,
    #[serde(default)]
    pub executed_size: f64,
    #[serde(default)]
    pub avg_fill_price: Option<f64>,
    #[serde(default)]
    pub commission: f64,
    #[serde(default)]
    pub cancel_reason: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Order {
    /// A fresh order in status NEW with no venue id.
    pub fn new(
        unique_id: UniqueId,
        symbol: impl Into<String>,
        side: OrderSide,
        kind: OrderKind,
        quantity: f64,
        now_ms: i64,
    ) -> Self {
        Self {
            unique_id,
            order_id: None,
            symbol: symbol.into(),
            side,
            kind,
            quantity,
            time_in_force: TimeInForce::Gtc,
            status: OrderStatus::New,
            executed_size: 0.0,
            avg_fill_price: None,
            commission: 0.0,
            cancel_reason: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    pub fn remaining_quantity(&self) -> f64 {
        (self.quantity - self.executed_size).max(0.0)
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Matches either the venue order id or the caller's unique id.
    pub fn matches_id(&self, id: &str) -> bool {
        self.unique_id.as_str() == id || self.order_id.as_ref().is_some_and(|o| o.as_str() == id)
    }

    pub fn transition(&mut self, next: OrderStatus, now_ms: i64) -> Result<(), OrderError> {
        if !self.status.can_transition_to(next) {
            return Err(OrderError::InvalidTransition {
                unique_id: self.unique_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now_ms;
        Ok(())
    }

    /// Record a (possibly partial) fill, updating the volume-weighted average
    /// fill price and moving to PARTIALLY_FILLED or FILLED.
    pub fn record_fill(
        &mut self,
        quantity: f64,
        price: f64,
        commission: f64,
        now_ms: i64,
    ) -> Result<(), OrderError> {
        if quantity <= 0.0 {
            return Err(OrderError::NonPositiveFill {
                unique_id: self.unique_id.clone(),
                fill: quantity,
            });
        }
        let remaining = self.remaining_quantity();
        if quantity > remaining + 1e-10 {
            return Err(OrderError::Overfill {
                unique_id: self.unique_id.clone(),
                fill: quantity,
                remaining,
            });
        }
        let next = if (remaining - quantity).abs() < 1e-10 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.transition(next, now_ms)?;

        let prior_notional = self.avg_fill_price.unwrap_or(0.0) * self.executed_size;
        self.executed_size += quantity;
        self.avg_fill_price = Some((prior_notional + price * quantity) / self.executed_size);
        self.commission += commission;
        Ok(())
    }

    /// Move to CANCELED, recording why.
    pub fn cancel(&mut self, reason: impl Into<String>, now_ms: i64) -> Result<(), OrderError> {
        self.transition(OrderStatus::Canceled, now_ms)?;
        self.cancel_reason = Some(reason.into());
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>, now_ms: i64) -> Result<(), OrderError> {
        self.transition(OrderStatus::Rejected, now_ms)?;
        self.cancel_reason = Some(reason.into());
        Ok(())
    }
}
