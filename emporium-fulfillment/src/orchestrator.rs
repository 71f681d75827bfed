//! Order Orchestrator
//!
//! Caller-facing entry point for creating and paying orders.
//!
//! - `create_order` checks stock optimistically (no reservation, no decrement)
//!   and cancels the order if any line already exceeds current stock.
//! - `pay_order` moves the order PENDING -> PAID with a compare-and-set in
//!   the store, then publishes the order-paid event. Of two concurrent
//!   payments only one wins the transition. A publish failure only delays
//!   settlement: `republish_unsettled` sends the event again for every PAID
//!   order that has no settlement outcome yet.

use crate::error::{FulfillmentError, FulfillmentResult};
use emporium_channel::OrderEventProducer;
use emporium_domain::{
    CallerContext, CompensationReport, CompensationStage, Order, OrderId, OrderPaidEvent,
    OrderStatus, Product, ProductId, Quantity,
};
use emporium_store::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// One requested line of a new order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: ProductId,
    pub quantity: Quantity,
}

impl OrderItemRequest {
    pub fn new(product_id: ProductId, quantity: u32) -> FulfillmentResult<Self> {
        Ok(Self {
            product_id,
            quantity: Quantity::new(quantity)?,
        })
    }
}

/// Creates and pays orders.
pub struct OrderOrchestrator<S: Store + ?Sized> {
    store: Arc<S>,
    producer: OrderEventProducer,
}

impl<S: Store + ?Sized> OrderOrchestrator<S> {
    pub fn new(store: Arc<S>, producer: OrderEventProducer) -> Self {
        Self { store, producer }
    }

    /// Create an order owned by `caller`.
    ///
    /// Every requested item is added first. If any line then asks for more
    /// than its product's stock at read time, the order is persisted as
    /// CANCELLED and `InsufficientStock` is returned. Otherwise the PENDING
    /// order is persisted and returned. Stock is never decremented here.
    pub async fn create_order(
        &self,
        caller: &CallerContext,
        requests: Vec<OrderItemRequest>,
    ) -> FulfillmentResult<Order> {
        let mut order = Order::new(caller.user_id);
        let mut products: HashMap<ProductId, Product> = HashMap::with_capacity(requests.len());

        for request in &requests {
            let product = self
                .store
                .products()
                .find_by_id(request.product_id)
                .await?
                .ok_or_else(|| FulfillmentError::not_found("product", request.product_id))?;
            order.add_item(&product, request.quantity)?;
            products.insert(product.id, product);
        }

        let report = CompensationReport::from_order(&order, &products, CompensationStage::Creation);
        if !report.is_empty() {
            order.cancel()?;
            self.store.orders().save(&order).await?;
            warn!(
                order_id = %order.id,
                user_id = %caller.user_id,
                shortfalls = report.shortfalls.len(),
                "Order cancelled: insufficient stock"
            );
            return Err(FulfillmentError::InsufficientStock(report));
        }

        self.store.orders().save(&order).await?;
        info!(
            order_id = %order.id,
            user_id = %caller.user_id,
            items = order.items().len(),
            total = %order.total_amount(),
            "Order created"
        );
        Ok(order)
    }

    /// Pay a PENDING order and publish the order-paid event.
    ///
    /// The PAID order is returned once it is persisted, whatever happens to
    /// the publish.
    pub async fn pay_order(&self, order_id: OrderId) -> FulfillmentResult<Order> {
        let mut order = self.get_order(order_id).await?;
        order.process_payment()?;

        let won = self
            .store
            .orders()
            .transition_status(order.id, OrderStatus::Pending, OrderStatus::Paid)
            .await?;
        if !won {
            warn!(order_id = %order.id, "Payment lost the race: order no longer pending");
            return Err(FulfillmentError::InvalidState(format!(
                "Order {} is no longer pending",
                order.id
            )));
        }
        let order = self.get_order(order_id).await?;
        info!(order_id = %order.id, total = %order.total_amount(), "Order paid");

        let event = OrderPaidEvent::for_order(&order);
        self.producer.publish_order_paid(&event).await;

        Ok(order)
    }

    /// Publish the order-paid event again for every PAID order without a
    /// settlement outcome. Returns how many were published.
    ///
    /// Safe to repeat: the channel drops duplicate keys and the reconciler
    /// skips orders that already have an outcome.
    pub async fn republish_unsettled(&self) -> FulfillmentResult<usize> {
        let pending = self.store.orders().find_paid_unsettled().await?;
        let mut published = 0;
        for order in &pending {
            if self.producer.publish_order_paid(&OrderPaidEvent::for_order(order)).await.is_some() {
                published += 1;
            }
        }
        if !pending.is_empty() {
            info!(unsettled = pending.len(), published, "Republished order paid events");
        }
        Ok(published)
    }

    pub async fn get_order(&self, order_id: OrderId) -> FulfillmentResult<Order> {
        self.store
            .orders()
            .find_by_id(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("order", order_id))
    }

    /// Orders owned by the caller, optionally filtered by status.
    pub async fn orders_for_user(
        &self,
        caller: &CallerContext,
        status: Option<OrderStatus>,
    ) -> FulfillmentResult<Vec<Order>> {
        let orders = match status {
            Some(status) => self.store.orders().find_by_user_and_status(caller.user_id, status).await?,
            None => self.store.orders().find_by_user(caller.user_id).await?,
        };
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use emporium_channel::{BrokerConfig, ChannelError, EventChannel, MemoryBroker, Subscription};
    use emporium_domain::{Money, ProductDetails};
    use emporium_store::{MemoryStore, OrderRepository, ProductRepository};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    const TOPIC: &str = "order-paid";

    struct DownChannel;

    #[async_trait]
    impl EventChannel for DownChannel {
        async fn publish(&self, _: &str, _: &str, _: serde_json::Value) -> Result<u64, ChannelError> {
            Err(ChannelError::Unavailable("broker unreachable".to_string()))
        }

        async fn subscribe(&self, _: &str) -> Result<Subscription, ChannelError> {
            Err(ChannelError::Unavailable("broker unreachable".to_string()))
        }
    }

    async fn seed(store: &MemoryStore, name: &str, price: rust_decimal::Decimal, stock: u32) -> Product {
        let product = Product::new(
            ProductDetails {
                name: name.to_string(),
                description: String::new(),
                price: Money::new(price).unwrap(),
                category: "home".to_string(),
            },
            stock,
        )
        .unwrap();
        ProductRepository::save(store, &product).await.unwrap();
        product
    }

    fn orchestrator(store: Arc<MemoryStore>, channel: Arc<dyn EventChannel>) -> OrderOrchestrator<MemoryStore> {
        OrderOrchestrator::new(store, OrderEventProducer::new(channel, TOPIC))
    }

    fn caller() -> CallerContext {
        CallerContext::new(Uuid::now_v7())
    }

    fn line(product: &Product, quantity: u32) -> OrderItemRequest {
        OrderItemRequest::new(product.id, quantity).unwrap()
    }

    #[tokio::test]
    async fn test_create_order_pending_with_total() {
        let store = Arc::new(MemoryStore::new());
        let lamp = seed(&store, "Lamp", dec!(25.00), 10).await;
        let mug = seed(&store, "Mug", dec!(4.50), 10).await;
        let orchestrator = orchestrator(store.clone(), Arc::new(MemoryBroker::default()));
        let caller = caller();

        let order = orchestrator
            .create_order(&caller, vec![line(&lamp, 2), line(&mug, 3)])
            .await
            .unwrap();

        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.user_id, caller.user_id);
        assert_eq!(order.total_amount().as_decimal(), dec!(63.50));
        // Creation never touches stock
        let stored = ProductRepository::find_by_id(store.as_ref(), lamp.id).await.unwrap().unwrap();
        assert_eq!(stored.stock_quantity(), 10);
        assert!(OrderRepository::find_by_id(store.as_ref(), order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_order_cancels_when_stock_short() {
        let store = Arc::new(MemoryStore::new());
        let lamp = seed(&store, "Lamp", dec!(25.00), 3).await;
        let orchestrator = orchestrator(store.clone(), Arc::new(MemoryBroker::default()));
        let caller = caller();

        let result = orchestrator.create_order(&caller, vec![line(&lamp, 5)]).await;

        let report = match result {
            Err(FulfillmentError::InsufficientStock(report)) => report,
            other => panic!("expected InsufficientStock, got {:?}", other),
        };
        assert_eq!(report.stage, CompensationStage::Creation);
        assert_eq!(report.to_string(), "[Product:Lamp, Available: 3, Requested: 5]");

        let stored = OrderRepository::find_by_id(store.as_ref(), report.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Cancelled);
        let product = ProductRepository::find_by_id(store.as_ref(), lamp.id).await.unwrap().unwrap();
        assert_eq!(product.stock_quantity(), 3);
    }

    #[tokio::test]
    async fn test_create_order_unknown_product() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(store.clone(), Arc::new(MemoryBroker::default()));

        let request = OrderItemRequest::new(Uuid::now_v7(), 1).unwrap();
        let result = orchestrator.create_order(&caller(), vec![request]).await;

        assert!(matches!(result, Err(FulfillmentError::NotFound { .. })));
        assert_eq!(store.order_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_empty_order() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(store, Arc::new(MemoryBroker::default()));

        let order = orchestrator.create_order(&caller(), vec![]).await.unwrap();

        assert!(order.is_pending());
        assert_eq!(order.total_amount(), Money::ZERO);
    }

    #[test]
    fn test_item_request_rejects_zero_quantity() {
        let result = OrderItemRequest::new(Uuid::now_v7(), 0);
        assert!(matches!(result, Err(FulfillmentError::Validation(_))));
    }

    #[tokio::test]
    async fn test_pay_order_persists_then_publishes() {
        let store = Arc::new(MemoryStore::new());
        let lamp = seed(&store, "Lamp", dec!(25.00), 10).await;
        let broker = MemoryBroker::new(BrokerConfig::default());
        let subscription = broker.subscribe(TOPIC).await.unwrap();
        let orchestrator = orchestrator(store.clone(), Arc::new(broker));

        let order = orchestrator.create_order(&caller(), vec![line(&lamp, 2)]).await.unwrap();
        let paid = orchestrator.pay_order(order.id).await.unwrap();
        assert!(paid.is_paid());

        let stored = OrderRepository::find_by_id(store.as_ref(), order.id).await.unwrap().unwrap();
        assert!(stored.is_paid());

        let delivery = subscription.next().await.unwrap();
        let event: OrderPaidEvent = delivery.decode().unwrap();
        assert_eq!(event.order_id, order.id);
        assert_eq!(event.total_amount.as_decimal(), dec!(50.00));
    }

    #[tokio::test]
    async fn test_pay_order_twice_is_invalid_state() {
        let store = Arc::new(MemoryStore::new());
        let lamp = seed(&store, "Lamp", dec!(25.00), 10).await;
        let orchestrator = orchestrator(store, Arc::new(MemoryBroker::default()));

        let order = orchestrator.create_order(&caller(), vec![line(&lamp, 1)]).await.unwrap();
        orchestrator.pay_order(order.id).await.unwrap();

        let again = orchestrator.pay_order(order.id).await;
        assert!(matches!(again, Err(FulfillmentError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_pay_unknown_order_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(store, Arc::new(MemoryBroker::default()));

        let result = orchestrator.pay_order(Uuid::now_v7()).await;
        assert!(matches!(result, Err(FulfillmentError::NotFound { ref entity, .. }) if entity == "order"));
    }

    #[tokio::test]
    async fn test_pay_order_survives_publish_failure() {
        let store = Arc::new(MemoryStore::new());
        let lamp = seed(&store, "Lamp", dec!(25.00), 10).await;
        let orchestrator = orchestrator(store.clone(), Arc::new(DownChannel));

        let order = orchestrator.create_order(&caller(), vec![line(&lamp, 1)]).await.unwrap();
        let paid = orchestrator.pay_order(order.id).await.unwrap();

        assert!(paid.is_paid());
        let stored = OrderRepository::find_by_id(store.as_ref(), order.id).await.unwrap().unwrap();
        assert!(stored.is_paid());
    }

    #[tokio::test]
    async fn test_concurrent_payments_pay_once() {
        let store = Arc::new(MemoryStore::new());
        let lamp = seed(&store, "Lamp", dec!(25.00), 10).await;
        let broker = Arc::new(MemoryBroker::new(BrokerConfig::default()));
        let _subscription = broker.subscribe(TOPIC).await.unwrap();
        let orchestrator = orchestrator(store, broker.clone());

        let order = orchestrator.create_order(&caller(), vec![line(&lamp, 1)]).await.unwrap();
        let (first, second) = tokio::join!(orchestrator.pay_order(order.id), orchestrator.pay_order(order.id));

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(FulfillmentError::InvalidState(_))))
                .count(),
            1
        );
        assert_eq!(broker.backlog(TOPIC).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_republish_unsettled_sends_paid_orders_again() {
        let store = Arc::new(MemoryStore::new());
        let lamp = seed(&store, "Lamp", dec!(25.00), 10).await;
        let down = orchestrator(store.clone(), Arc::new(DownChannel));

        let paid = down.create_order(&caller(), vec![line(&lamp, 1)]).await.unwrap();
        down.pay_order(paid.id).await.unwrap();
        down.create_order(&caller(), vec![line(&lamp, 1)]).await.unwrap();

        let broker = MemoryBroker::new(BrokerConfig::default());
        let subscription = broker.subscribe(TOPIC).await.unwrap();
        let up = orchestrator(store, Arc::new(broker));

        assert_eq!(up.republish_unsettled().await.unwrap(), 1);
        let event: OrderPaidEvent = subscription.next().await.unwrap().decode().unwrap();
        assert_eq!(event.order_id, paid.id);
    }

    #[tokio::test]
    async fn test_orders_for_user_filters_by_owner_and_status() {
        let store = Arc::new(MemoryStore::new());
        let lamp = seed(&store, "Lamp", dec!(25.00), 10).await;
        let orchestrator = orchestrator(store, Arc::new(MemoryBroker::default()));
        let alice = caller();
        let bob = caller();

        let first = orchestrator.create_order(&alice, vec![line(&lamp, 1)]).await.unwrap();
        orchestrator.create_order(&alice, vec![line(&lamp, 1)]).await.unwrap();
        orchestrator.create_order(&bob, vec![line(&lamp, 1)]).await.unwrap();
        orchestrator.pay_order(first.id).await.unwrap();

        assert_eq!(orchestrator.orders_for_user(&alice, None).await.unwrap().len(), 2);
        let paid = orchestrator.orders_for_user(&alice, Some(OrderStatus::Paid)).await.unwrap();
        assert_eq!(paid.len(), 1);
        assert_eq!(paid[0].id, first.id);
        assert_eq!(orchestrator.orders_for_user(&bob, None).await.unwrap().len(), 1);
    }
}
