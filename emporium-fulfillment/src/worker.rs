//! Reconciler worker: consumes order-paid deliveries and acknowledges them.
//!
//! Ack policy:
//! - handled (settled, compensated, duplicate, skipped) → ack
//! - undecodable payload → ack (redelivery cannot fix it)
//! - retryable failure → nack (redelivered)
//! - other failure → ack

use crate::reconciler::{ReconcileOutcome, StockReconciler};
use emporium_channel::{ChannelError, Delivery, Subscription};
use emporium_domain::OrderPaidEvent;
use emporium_store::Store;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One consumer flow. Several workers may share a subscription.
pub struct ReconcilerWorker<S: Store + ?Sized> {
    name: String,
    reconciler: Arc<StockReconciler<S>>,
}

impl<S: Store + ?Sized> ReconcilerWorker<S> {
    pub fn new(name: impl Into<String>, reconciler: Arc<StockReconciler<S>>) -> Self {
        Self { name: name.into(), reconciler }
    }

    /// Run until shutdown is signaled or the subscription ends.
    ///
    /// A delivery being handled when shutdown is signaled is finished first.
    pub async fn run(self, subscription: Subscription, shutdown: CancellationToken) {
        info!(worker = %self.name, topic = subscription.topic(), "Reconciler worker started");

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(worker = %self.name, "Reconciler worker shutdown requested");
                    break;
                }
                next = subscription.next() => match next {
                    Some(delivery) => delivery,
                    None => {
                        info!(worker = %self.name, "Subscription closed");
                        break;
                    }
                }
            };

            self.process(delivery).await;
        }

        info!(worker = %self.name, "Reconciler worker stopped");
    }

    /// Handle one delivery and settle it with the broker.
    pub async fn process(&self, delivery: Delivery) {
        let offset = delivery.offset;
        let attempt = delivery.attempt;

        let event: OrderPaidEvent = match delivery.decode() {
            Ok(event) => event,
            Err(e) => {
                error!(
                    worker = %self.name,
                    offset,
                    key = %delivery.key,
                    error = %e,
                    "Dropping undecodable order paid message"
                );
                self.settle(delivery.ack(), offset);
                return;
            },
        };

        debug!(worker = %self.name, order_id = %event.order_id, offset, attempt, "Order paid event received");

        match self.reconciler.handle(&event).await {
            Ok(outcome) => {
                if let ReconcileOutcome::Skipped(reason) = &outcome {
                    warn!(worker = %self.name, order_id = %event.order_id, %reason, "Order paid event skipped");
                }
                self.settle(delivery.ack(), offset);
            },
            Err(e) if e.is_retryable() => {
                warn!(
                    worker = %self.name,
                    order_id = %event.order_id,
                    attempt,
                    error = %e,
                    "Settlement failed (will redeliver)"
                );
                self.settle(delivery.nack(), offset);
            },
            Err(e) => {
                error!(
                    worker = %self.name,
                    order_id = %event.order_id,
                    error = %e,
                    "Settlement failed with non-retryable error"
                );
                self.settle(delivery.ack(), offset);
            },
        }
    }

    fn settle(&self, result: Result<(), ChannelError>, offset: u64) {
        match result {
            Ok(()) => {},
            Err(ChannelError::StaleDelivery { .. }) => {
                // Timed out and handed to another consumer; that delivery will settle it
                warn!(worker = %self.name, offset, "Delivery no longer in flight");
            },
            Err(e) => error!(worker = %self.name, offset, error = %e, "Failed to settle delivery"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InventoryLedger, SettlementPolicy};
    use emporium_channel::{BrokerConfig, EventChannel, MemoryBroker};
    use emporium_domain::{Money, Order, Product, ProductDetails, Quantity};
    use emporium_search::{MemorySearchIndex, SearchSynchronizer};
    use emporium_store::{MemoryStore, OrderRepository, ProductRepository};
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use uuid::Uuid;

    const TOPIC: &str = "order-paid";

    fn worker(store: Arc<MemoryStore>) -> ReconcilerWorker<MemoryStore> {
        let search = SearchSynchronizer::direct(Arc::new(MemorySearchIndex::new()));
        let ledger = Arc::new(InventoryLedger::new(store.clone(), search, SettlementPolicy::BestEffort));
        ReconcilerWorker::new("worker-0", Arc::new(StockReconciler::new(store, ledger)))
    }

    async fn paid_order(store: &MemoryStore, stock: u32, quantity: u32) -> (Product, Order) {
        let product = Product::new(
            ProductDetails {
                name: "Shelf".to_string(),
                description: String::new(),
                price: Money::new(dec!(45)).unwrap(),
                category: "furniture".to_string(),
            },
            stock,
        )
        .unwrap();
        ProductRepository::save(store, &product).await.unwrap();

        let mut order = Order::new(Uuid::now_v7());
        order.add_item(&product, Quantity::new(quantity).unwrap()).unwrap();
        order.process_payment().unwrap();
        OrderRepository::save(store, &order).await.unwrap();
        (product, order)
    }

    async fn wait_for_empty_backlog(broker: &MemoryBroker) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while broker.backlog(TOPIC).unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_worker_settles_and_acks() {
        let store = Arc::new(MemoryStore::new());
        let (product, order) = paid_order(&store, 5, 2).await;
        let broker = MemoryBroker::new(BrokerConfig::default());
        let subscription = broker.subscribe(TOPIC).await.unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker(store.clone()).run(subscription, shutdown.clone()));

        let event = OrderPaidEvent::for_order(&order);
        broker
            .publish(TOPIC, &event.key(), serde_json::to_value(&event).unwrap())
            .await
            .unwrap();

        wait_for_empty_backlog(&broker).await;
        let stored = ProductRepository::find_by_id(store.as_ref(), product.id).await.unwrap().unwrap();
        assert_eq!(stored.stock_quantity(), 3);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_acks_undecodable_payload() {
        let store = Arc::new(MemoryStore::new());
        let broker = MemoryBroker::new(BrokerConfig::default());
        let subscription = broker.subscribe(TOPIC).await.unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker(store).run(subscription, shutdown.clone()));

        broker
            .publish(TOPIC, "garbage", serde_json::json!({ "unexpected": true }))
            .await
            .unwrap();

        wait_for_empty_backlog(&broker).await;
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_stops_when_broker_closes() {
        let store = Arc::new(MemoryStore::new());
        let broker = MemoryBroker::new(BrokerConfig::default());
        let subscription = broker.subscribe(TOPIC).await.unwrap();
        let handle = tokio::spawn(worker(store).run(subscription, CancellationToken::new()));

        broker.close();

        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
