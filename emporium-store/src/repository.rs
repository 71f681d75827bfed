//! Repository trait definitions (Ports)
//!
//! These traits define the storage interface for the domain.
//! Implementations can be PostgreSQL, in-memory, or mock for testing.

use crate::error::StoreError;
use async_trait::async_trait;
use emporium_domain::{
    Order, OrderId, OrderItem, OrderItemId, OrderStatus, Product, ProductId, Quantity,
    SettlementOutcome, UserId,
};

/// One order line to settle against the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementLine {
    /// Order being settled
    pub order_id: OrderId,
    /// Item of that order; together with `order_id` the idempotency key
    pub item_id: OrderItemId,
    /// Product whose stock moves
    pub product_id: ProductId,
    /// Units to decrement
    pub quantity: Quantity,
}

impl SettlementLine {
    /// Line for an item of `order_id`
    pub fn for_item(order_id: OrderId, item: &OrderItem) -> Self {
        Self {
            order_id,
            item_id: item.id,
            product_id: item.product_id,
            quantity: item.quantity,
        }
    }
}

/// Result of settling one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineSettlement {
    /// Decremented now
    Applied(Product),
    /// Decremented by an earlier delivery of the same event; nothing changed
    AlreadyApplied(Product),
    /// Stock did not cover the line; nothing changed
    Insufficient(Product),
}

/// Repository for Product entities
#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Save a product (insert or update)
    async fn save(&self, product: &Product) -> Result<(), StoreError>;

    /// Find a product by ID
    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, StoreError>;

    /// Find all products in a category
    async fn find_by_category(&self, category: &str) -> Result<Vec<Product>, StoreError>;

    /// Add units to stock and return the updated product
    async fn increase_stock(&self, id: ProductId, quantity: Quantity) -> Result<Product, StoreError>;
}

/// Repository for Order aggregates (items are always loaded with the order)
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Save an order and its items (insert or update)
    async fn save(&self, order: &Order) -> Result<(), StoreError>;

    /// Find an order by ID, items included
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Find all orders owned by a user
    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError>;

    /// Find a user's orders in a given status
    async fn find_by_user_and_status(
        &self,
        user_id: UserId,
        status: OrderStatus,
    ) -> Result<Vec<Order>, StoreError>;

    /// Move an order from `from` to `to` only if it is still in `from`
    /// (compare-and-set). Returns false if the order is in another status.
    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError>;

    /// PAID orders with no recorded settlement outcome, oldest first
    async fn find_paid_unsettled(&self) -> Result<Vec<Order>, StoreError>;
}

/// Repository for settlement bookkeeping (idempotent stock settlement)
#[async_trait]
pub trait SettlementRepository: Send + Sync {
    /// Atomically: if the line was already applied return `AlreadyApplied`,
    /// else compare-and-decrement the product and record the line.
    async fn settle_line(&self, line: &SettlementLine) -> Result<LineSettlement, StoreError>;

    /// Undo an applied line: restore stock and forget the line marker.
    async fn release_line(&self, line: &SettlementLine) -> Result<Product, StoreError>;

    /// Record the final outcome for an order (idempotent overwrite)
    async fn record_outcome(
        &self,
        order_id: OrderId,
        outcome: &SettlementOutcome,
    ) -> Result<(), StoreError>;

    /// Outcome recorded for an order, if any
    async fn find_outcome(&self, order_id: OrderId) -> Result<Option<SettlementOutcome>, StoreError>;
}

/// Combined store interface
pub trait Store: Send + Sync {
    /// Get product repository
    fn products(&self) -> &dyn ProductRepository;

    /// Get order repository
    fn orders(&self) -> &dyn OrderRepository;

    /// Get settlement repository
    fn settlements(&self) -> &dyn SettlementRepository;
}
