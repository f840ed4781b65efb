//! Exec response: the order operations an exec call produced.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{ExecId, Order};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecStatus {
    Success,
    /// Strategy code failed after some order operations were collected.
    PartialSuccess,
    Failed,
}

impl ExecStatus {
    /// Numeric status code used on the wire by venue gateways.
    pub fn code(self) -> u8 {
        match self {
            ExecStatus::Success => 0,
            ExecStatus::PartialSuccess => 1,
            ExecStatus::Failed => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderOp {
    Create,
    Cancel,
    Modify,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderOpEvent {
    pub op: OrderOp,
    pub order: Order,
}

/// A strategy's annotated decision, kept for visualization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub timestamp: i64,
    pub symbol: String,
    pub decision_type: String,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
    #[serde(default)]
    pub trigger_condition: String,
    #[serde(default)]
    pub condition_result: bool,
    #[serde(default)]
    pub decision_reason: String,
    #[serde(default)]
    pub strategy_state: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecResponse {
    pub exec_id: ExecId,
    pub status: ExecStatus,
    #[serde(default)]
    pub events: Vec<OrderOpEvent>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ExecResponse {
    pub fn failed(exec_id: ExecId, message: impl Into<String>) -> Self {
        Self {
            exec_id,
            status: ExecStatus::Failed,
            events: Vec::new(),
            error_message: Some(message.into()),
            warnings: Vec::new(),
            decisions: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecStatus::Success
    }

    pub fn events_of(&self, op: OrderOp) -> impl Iterator<Item = &Order> {
        self.events.iter().filter(move |e| e.op == op).map(|e| &e.order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderKind, OrderSide, UniqueId};

    #[test]
    fn status_codes() {
        assert_eq!(ExecStatus::Success.code(), 0);
        assert_eq!(ExecStatus::PartialSuccess.code(), 1);
        assert_eq!(ExecStatus::Failed.code(), 2);
    }

    #[test]
    fn events_of_filters_by_op() {
        let order = Order::new(UniqueId::new("u"), "X", OrderSide::Buy, OrderKind::Market, 1.0, 0);
        let mut resp = ExecResponse::failed(ExecId::new("e"), "boom");
        resp.events.push(OrderOpEvent { op: OrderOp::Create, order: order.clone() });
        resp.events.push(OrderOpEvent { op: OrderOp::Cancel, order });
        assert_eq!(resp.events_of(OrderOp::Create).count(), 1);
        assert_eq!(resp.events_of(OrderOp::Modify).count(), 0);
        assert!(!resp.is_success());
    }
}
