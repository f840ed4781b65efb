//! Accumulates order intents issued during one exec call.

use crate::domain::Order;
use crate::exec::{OrderOp, OrderOpEvent};

#[derive(Debug, Default)]
pub struct OrderCollector {
    events: Vec<OrderOpEvent>,
}

impl OrderCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: OrderOp, order: Order) {
        self.events.push(OrderOpEvent { op, order });
    }

    /// Order created earlier in this call with a matching unique or venue id.
    pub fn find_created(&self, id: &str) -> Option<&Order> {
        self.events
            .iter()
            .filter(|e| e.op == OrderOp::Create)
            .map(|e| &e.order)
            .find(|o| o.matches_id(id))
    }

    pub fn has_cancel(&self, id: &str) -> bool {
        self.events.iter().any(|e| e.op == OrderOp::Cancel && e.order.matches_id(id))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[OrderOpEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<OrderOpEvent> {
        self.events
    }
}
