//! Domain Entities for Emporium
//!
//! Core business entities with lifecycle management.
//! All entities have identity; `Order` owns its state machine.

use crate::value_objects::{DomainError, Money, Quantity};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// IDs
// =============================================================================

/// Unique identifier for a Product
pub type ProductId = Uuid;

/// Unique identifier for an Order
pub type OrderId = Uuid;

/// Unique identifier for an OrderItem
pub type OrderItemId = Uuid;

/// Unique identifier for the user owning an Order
pub type UserId = Uuid;

/// Next audit timestamp after `previous`.
///
/// Truncated to microseconds and always at least one microsecond later than
/// `previous`, so successive revisions of an entity stay strictly ordered at
/// storage precision. Search documents use it as their version.
pub fn next_revision(previous: DateTime<Utc>) -> DateTime<Utc> {
    std::cmp::max(Utc::now().trunc_subsecs(6), previous + chrono::Duration::microseconds(1))
}

// =============================================================================
// Product
// =============================================================================

/// Descriptive product fields (everything except identity, stock and audit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetails {
    /// Display name, must not be blank
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Unit price
    pub price: Money,
    /// Catalog category, must not be blank
    pub category: String,
}

impl ProductDetails {
    fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::InvalidProduct("Name must not be blank".to_string()));
        }
        if self.category.trim().is_empty() {
            return Err(DomainError::InvalidProduct("Category must not be blank".to_string()));
        }
        Ok(())
    }
}

/// Product sold from the catalog, owning its stock count.
///
/// Stock is mutated only through `increase_stock` / `decrease_stock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product identifier
    pub id: ProductId,
    /// Display name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Unit price
    pub price: Money,
    /// Catalog category
    pub category: String,
    stock_quantity: u32,

    // Audit
    /// When the product was created
    pub created_at: DateTime<Utc>,
    /// Last change; strictly increases with every mutation
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Create a new product with an initial stock count
    pub fn new(details: ProductDetails, stock_quantity: u32) -> Result<Self, DomainError> {
        details.validate()?;
        let now = Utc::now().trunc_subsecs(6);
        Ok(Self {
            id: Uuid::now_v7(),
            name: details.name,
            description: details.description,
            price: details.price,
            category: details.category,
            stock_quantity,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuild a product from persisted fields
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ProductId,
        name: String,
        description: String,
        price: Money,
        category: String,
        stock_quantity: u32,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self { id, name, description, price, category, stock_quantity, created_at, updated_at }
    }

    /// Current units in stock
    pub fn stock_quantity(&self) -> u32 {
        self.stock_quantity
    }

    /// Replace the descriptive fields; stock and identity are untouched
    pub fn update_details(&mut self, details: ProductDetails) -> Result<(), DomainError> {
        details.validate()?;
        self.name = details.name;
        self.description = details.description;
        self.price = details.price;
        self.category = details.category;
        self.touch();
        Ok(())
    }

    /// True iff stock > 0 and stock >= quantity
    pub fn has_stock(&self, quantity: Quantity) -> bool {
        self.stock_quantity > 0 && self.stock_quantity >= quantity.get()
    }

    /// Remove units from stock.
    ///
    /// Callers check `has_stock` first; this still refuses to go negative.
    pub fn decrease_stock(&mut self, quantity: Quantity) -> Result<(), DomainError> {
        self.stock_quantity = self.stock_quantity.checked_sub(quantity.get()).ok_or(
            DomainError::StockUnderflow {
                available: self.stock_quantity,
                requested: quantity.get(),
            },
        )?;
        self.touch();
        Ok(())
    }

    /// Add units to stock (restock)
    pub fn increase_stock(&mut self, quantity: Quantity) {
        self.stock_quantity = self.stock_quantity.saturating_add(quantity.get());
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = next_revision(self.updated_at);
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Order lifecycle states. `Paid` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Initial state, items may change
    Pending,
    /// Payment processed, awaiting stock settlement
    Paid,
    /// Cancelled, final
    Cancelled,
}

impl OrderStatus {
    /// Stable string form used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parse the persisted string form
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::InvalidState(format!("Unknown order status: {}", other))),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Order Item
// =============================================================================

/// One line of an order.
///
/// `unit_price` is a snapshot of the product price at add time and
/// `total_price` is computed once at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Item identifier
    pub id: OrderItemId,
    /// Owning order
    pub order_id: OrderId,
    /// Ordered product
    pub product_id: ProductId,
    /// Product name at time of purchase (display and shortfall reports)
    pub product_name: String,
    /// Units ordered
    pub quantity: Quantity,
    /// Product price at add time
    pub unit_price: Money,
    /// `unit_price * quantity`
    pub total_price: Money,
}

impl OrderItem {
    fn snapshot(order_id: OrderId, product: &Product, quantity: Quantity) -> Self {
        Self {
            id: Uuid::now_v7(),
            order_id,
            product_id: product.id,
            product_name: product.name.clone(),
            quantity,
            unit_price: product.price,
            total_price: product.price.times(quantity),
        }
    }
}

// =============================================================================
// Order
// =============================================================================

/// Order aggregate.
///
/// # Invariants
/// - `total_amount` always equals the sum of item `total_price`, recomputed on every change
/// - items change and payment happen only in `Pending`
/// - no transition leaves `Paid` or `Cancelled`
///
/// None of the transitions perform I/O. Decoding goes through
/// [`Order::restore`], so a serialized total is never trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OrderRecord")]
pub struct Order {
    /// Order identifier
    pub id: OrderId,
    /// Owning user
    pub user_id: UserId,
    items: Vec<OrderItem>,
    total_amount: Money,
    status: OrderStatus,

    // Audit
    /// When the order was created
    pub created_at: DateTime<Utc>,
    /// Last transition or item change
    pub updated_at: DateTime<Utc>,
}

/// Wire form of an [`Order`]; any serialized total is ignored.
#[derive(Deserialize)]
struct OrderRecord {
    id: OrderId,
    user_id: UserId,
    items: Vec<OrderItem>,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrderRecord> for Order {
    fn from(record: OrderRecord) -> Self {
        Order::restore(
            record.id,
            record.user_id,
            record.items,
            record.status,
            record.created_at,
            record.updated_at,
        )
    }
}

impl Order {
    /// Create an empty pending order owned by `user_id`
    pub fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            user_id,
            items: Vec::new(),
            total_amount: Money::ZERO,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Rebuild an order from persisted fields. The total is recomputed from the items.
    pub fn restore(
        id: OrderId,
        user_id: UserId,
        items: Vec<OrderItem>,
        status: OrderStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let mut order = Self {
            id,
            user_id,
            items,
            total_amount: Money::ZERO,
            status,
            created_at,
            updated_at,
        };
        order.recalculate_total();
        order
    }

    /// Items in insertion order
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    /// Derived total of all items
    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// Current lifecycle state
    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Check if order is pending
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    /// Check if order is paid
    pub fn is_paid(&self) -> bool {
        self.status == OrderStatus::Paid
    }

    /// Check if order is cancelled
    pub fn is_cancelled(&self) -> bool {
        self.status == OrderStatus::Cancelled
    }

    /// Add a line for `product`, snapshotting its current price.
    pub fn add_item(&mut self, product: &Product, quantity: Quantity) -> Result<&OrderItem, DomainError> {
        self.ensure_pending("add item")?;

        self.items.push(OrderItem::snapshot(self.id, product, quantity));
        self.recalculate_total();
        self.touch();

        Ok(&self.items[self.items.len() - 1])
    }

    /// Remove a line by id and return it.
    pub fn remove_item(&mut self, item_id: OrderItemId) -> Result<OrderItem, DomainError> {
        self.ensure_pending("remove item")?;

        let index = self
            .items
            .iter()
            .position(|item| item.id == item_id)
            .ok_or(DomainError::ItemNotFound(item_id))?;
        let removed = self.items.remove(index);
        self.recalculate_total();
        self.touch();

        Ok(removed)
    }

    /// PENDING → PAID. A second call fails.
    pub fn process_payment(&mut self) -> Result<(), DomainError> {
        self.ensure_pending("process payment")?;
        self.status = OrderStatus::Paid;
        self.touch();
        Ok(())
    }

    /// PENDING → CANCELLED. Cancellation is final.
    pub fn cancel(&mut self) -> Result<(), DomainError> {
        self.ensure_pending("cancel")?;
        self.status = OrderStatus::Cancelled;
        self.touch();
        Ok(())
    }

    fn ensure_pending(&self, operation: &str) -> Result<(), DomainError> {
        if self.status != OrderStatus::Pending {
            return Err(DomainError::InvalidState(format!(
                "Orders can only be modified in pending status (cannot {} on {} order {})",
                operation, self.status, self.id
            )));
        }
        Ok(())
    }

    fn recalculate_total(&mut self) {
        self.total_amount = self.items.iter().map(|item| item.total_price).sum();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// =============================================================================
// Tests
// =============================================================================
