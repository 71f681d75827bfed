//! Compensation reporting for stock shortfalls.
//!
//! A shortfall is reported, never retried. The report renders one
//! `[Product:<name>, Available: <n>, Requested: <m>]` line per offending item.

use crate::entities::{Order, OrderId, OrderItemId, Product, ProductId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Where in the pipeline the shortfall was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStage {
    /// Optimistic check while creating the order (order is cancelled)
    Creation,
    /// Authoritative decrement after payment (order stays paid)
    Settlement,
}

impl fmt::Display for CompensationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompensationStage::Creation => write!(f, "creation"),
            CompensationStage::Settlement => write!(f, "settlement"),
        }
    }
}

/// One item that could not be covered by stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockShortfall {
    /// Short product
    pub product_id: ProductId,
    /// Product name as ordered
    pub product_name: String,
    /// Units in stock when the shortfall was found
    pub available: u32,
    /// Units the order asked for
    pub requested: u32,
}

impl fmt::Display for StockShortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[Product:{}, Available: {}, Requested: {}]",
            self.product_name, self.available, self.requested
        )
    }
}

/// Itemized business failure raised when stock is insufficient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationReport {
    /// Order that could not be covered
    pub order_id: OrderId,
    /// Where the shortfall was found
    pub stage: CompensationStage,
    /// One entry per short item, in item order
    pub shortfalls: Vec<StockShortfall>,
}

impl CompensationReport {
    /// Create a report from already computed shortfalls
    pub fn new(order_id: OrderId, stage: CompensationStage, shortfalls: Vec<StockShortfall>) -> Self {
        Self { order_id, stage, shortfalls }
    }

    /// Enumerate every item of `order` whose quantity exceeds the current stock
    /// of its product. Items whose product is missing from `products` are skipped.
    pub fn from_order(order: &Order, products: &HashMap<ProductId, Product>, stage: CompensationStage) -> Self {
        let shortfalls = order
            .items()
            .iter()
            .filter_map(|item| {
                let product = products.get(&item.product_id)?;
                (item.quantity.get() > product.stock_quantity()).then(|| StockShortfall {
                    product_id: product.id,
                    product_name: product.name.clone(),
                    available: product.stock_quantity(),
                    requested: item.quantity.get(),
                })
            })
            .collect();

        Self::new(order.id, stage, shortfalls)
    }

    /// True if no item was short
    pub fn is_empty(&self) -> bool {
        self.shortfalls.is_empty()
    }
}

impl fmt::Display for CompensationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, shortfall) in self.shortfalls.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", shortfall)?;
        }
        Ok(())
    }
}

/// Per-order settled marker recorded once settlement finishes.
///
/// Redelivered events for an order that already has an outcome are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// Every line was decremented
    Settled {
        /// Lines applied for the order
        lines: Vec<OrderItemId>,
    },
    /// At least one line was short; the report lists them
    Compensated(CompensationReport),
}

impl SettlementOutcome {
    /// Stable name for logs and persistence
    pub fn name(&self) -> &'static str {
        match self {
            SettlementOutcome::Settled { .. } => "settled",
            SettlementOutcome::Compensated(_) => "compensated",
        }
    }
}
