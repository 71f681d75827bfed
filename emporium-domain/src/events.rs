//! Domain events carried over the event channel.

use crate::entities::{Order, OrderId};
use crate::value_objects::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Emitted when an order transitions to `Paid`.
///
/// Not persisted; it is the payload of the order-paid topic and is keyed by `order_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaidEvent {
    /// Order that was paid
    pub order_id: OrderId,
    /// Total charged for the order
    pub total_amount: Money,
    /// When the payment was processed
    pub paid_at: DateTime<Utc>,
}

impl OrderPaidEvent {
    /// Build the event for a paid order
    pub fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            total_amount: order.total_amount(),
            paid_at: Utc::now(),
        }
    }

    /// Channel key: events for one order stay ordered
    pub fn key(&self) -> String {
        self.order_id.to_string()
    }
}
