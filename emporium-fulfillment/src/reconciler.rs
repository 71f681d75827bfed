//! Stock Reconciler
//!
//! Consumes order-paid events and settles stock for the order. Delivery is
//! at-least-once, so handling is idempotent at two levels:
//! - a per-order outcome marker: once recorded, the event is skipped
//! - per-line markers written with each decrement (see `InventoryLedger::settle_stock`),
//!   covering a crash between the first decrement and the outcome marker

use crate::error::{FulfillmentError, FulfillmentResult};
use crate::ledger::InventoryLedger;
use emporium_domain::{CompensationReport, OrderItemId, OrderPaidEvent, SettlementOutcome};
use emporium_store::Store;
use std::sync::Arc;
use tracing::{info, warn};

/// How an order-paid event was handled. Every variant is terminal: the
/// delivery should be acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Every line decremented
    Settled { lines: Vec<OrderItemId> },
    /// Stock was short; the report lists the lines
    Compensated(CompensationReport),
    /// An earlier delivery already settled the order
    AlreadyProcessed,
    /// Nothing to settle (unknown order, or order not PAID)
    Skipped(String),
}

/// Settles stock for paid orders.
pub struct StockReconciler<S: Store + ?Sized> {
    store: Arc<S>,
    ledger: Arc<InventoryLedger<S>>,
}

impl<S: Store + ?Sized> StockReconciler<S> {
    pub fn new(store: Arc<S>, ledger: Arc<InventoryLedger<S>>) -> Self {
        Self { store, ledger }
    }

    /// Handle one order-paid event.
    ///
    /// Business failures (short stock, unknown or unpaid order) are returned
    /// as outcomes. Only infrastructure failures are returned as errors, and
    /// those are retryable.
    pub async fn handle(&self, event: &OrderPaidEvent) -> FulfillmentResult<ReconcileOutcome> {
        let order_id = event.order_id;

        if let Some(previous) = self.store.settlements().find_outcome(order_id).await? {
            info!(%order_id, outcome = previous.name(), "Order already settled, skipping");
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let Some(order) = self.store.orders().find_by_id(order_id).await? else {
            warn!(%order_id, "Order paid event for unknown order");
            return Ok(ReconcileOutcome::Skipped(format!("order {} not found", order_id)));
        };
        if !order.is_paid() {
            warn!(%order_id, status = %order.status(), "Order paid event for unpaid order");
            return Ok(ReconcileOutcome::Skipped(format!("order {} is {}", order_id, order.status())));
        }

        match self.ledger.settle_stock(&order).await {
            Ok(lines) => {
                let outcome = SettlementOutcome::Settled { lines: lines.clone() };
                self.store.settlements().record_outcome(order_id, &outcome).await?;
                info!(%order_id, lines = lines.len(), "Order settled");
                Ok(ReconcileOutcome::Settled { lines })
            },
            Err(FulfillmentError::InsufficientStock(report)) => {
                let outcome = SettlementOutcome::Compensated(report.clone());
                self.store.settlements().record_outcome(order_id, &outcome).await?;
                warn!(
                    %order_id,
                    policy = %self.ledger.policy(),
                    shortfalls = report.shortfalls.len(),
                    report = %report,
                    "Settlement compensated: insufficient stock"
                );
                Ok(ReconcileOutcome::Compensated(report))
            },
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SettlementPolicy;
    use chrono::Utc;
    use emporium_domain::{Money, Order, Product, ProductDetails, ProductId, Quantity};
    use emporium_search::{MemorySearchIndex, SearchSynchronizer};
    use emporium_store::{MemoryStore, OrderRepository, ProductRepository};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn reconciler(store: Arc<MemoryStore>) -> StockReconciler<MemoryStore> {
        let search = SearchSynchronizer::direct(Arc::new(MemorySearchIndex::new()));
        let ledger = Arc::new(InventoryLedger::new(store.clone(), search, SettlementPolicy::BestEffort));
        StockReconciler::new(store, ledger)
    }

    async fn seed(store: &MemoryStore, stock: u32) -> Product {
        let product = Product::new(
            ProductDetails {
                name: "Chair".to_string(),
                description: String::new(),
                price: Money::new(dec!(80)).unwrap(),
                category: "furniture".to_string(),
            },
            stock,
        )
        .unwrap();
        ProductRepository::save(store, &product).await.unwrap();
        product
    }

    async fn paid_order(store: &MemoryStore, product: &Product, quantity: u32) -> Order {
        let mut order = Order::new(Uuid::now_v7());
        order.add_item(product, Quantity::new(quantity).unwrap()).unwrap();
        order.process_payment().unwrap();
        OrderRepository::save(store, &order).await.unwrap();
        order
    }

    async fn stock(store: &MemoryStore, id: ProductId) -> u32 {
        ProductRepository::find_by_id(store, id).await.unwrap().unwrap().stock_quantity()
    }

    #[tokio::test]
    async fn test_settles_paid_order() {
        let store = Arc::new(MemoryStore::new());
        let chair = seed(&store, 5).await;
        let order = paid_order(&store, &chair, 2).await;
        let reconciler = reconciler(store.clone());

        let outcome = reconciler.handle(&OrderPaidEvent::for_order(&order)).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Settled { ref lines } if lines.len() == 1));
        assert_eq!(stock(&store, chair.id).await, 3);
    }

    #[tokio::test]
    async fn test_redelivery_is_already_processed() {
        let store = Arc::new(MemoryStore::new());
        let chair = seed(&store, 5).await;
        let order = paid_order(&store, &chair, 2).await;
        let reconciler = reconciler(store.clone());
        let event = OrderPaidEvent::for_order(&order);

        reconciler.handle(&event).await.unwrap();
        let again = reconciler.handle(&event).await.unwrap();

        assert_eq!(again, ReconcileOutcome::AlreadyProcessed);
        assert_eq!(stock(&store, chair.id).await, 3);
    }

    #[tokio::test]
    async fn test_short_stock_is_compensated_and_recorded() {
        let store = Arc::new(MemoryStore::new());
        let chair = seed(&store, 1).await;
        let order = paid_order(&store, &chair, 2).await;
        let reconciler = reconciler(store.clone());
        let event = OrderPaidEvent::for_order(&order);

        let outcome = reconciler.handle(&event).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Compensated(ref report) if report.shortfalls.len() == 1));
        assert_eq!(stock(&store, chair.id).await, 1);
        // The order stays paid
        let stored = OrderRepository::find_by_id(store.as_ref(), order.id).await.unwrap().unwrap();
        assert!(stored.is_paid());
        // Compensation is terminal
        assert_eq!(reconciler.handle(&event).await.unwrap(), ReconcileOutcome::AlreadyProcessed);
    }

    #[tokio::test]
    async fn test_unknown_order_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let reconciler = reconciler(store);
        let event = OrderPaidEvent {
            order_id: Uuid::now_v7(),
            total_amount: Money::ZERO,
            paid_at: Utc::now(),
        };

        let outcome = reconciler.handle(&event).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_pending_order_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let chair = seed(&store, 5).await;
        let mut order = Order::new(Uuid::now_v7());
        order.add_item(&chair, Quantity::new(1).unwrap()).unwrap();
        OrderRepository::save(store.as_ref(), &order).await.unwrap();
        let reconciler = reconciler(store.clone());

        let outcome = reconciler.handle(&OrderPaidEvent::for_order(&order)).await.unwrap();

        assert!(matches!(outcome, ReconcileOutcome::Skipped(_)));
        assert_eq!(stock(&store, chair.id).await, 5);
    }
}
