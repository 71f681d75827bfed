//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! Thread-safe using RwLock for concurrent access. Stock mutations take the
//! product write lock for the whole check-and-decrement, which gives the same
//! guarantee as the conditional UPDATE of the PostgreSQL adapter.

use crate::error::StoreError;
use crate::repository::{
    LineSettlement, OrderRepository, ProductRepository, SettlementLine, SettlementRepository, Store,
};
use async_trait::async_trait;
use emporium_domain::{
    next_revision, DomainError, Order, OrderId, OrderItemId, OrderStatus, Product, ProductId,
    Quantity, SettlementOutcome, UserId,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory store for testing
pub struct MemoryStore {
    products: RwLock<HashMap<ProductId, Product>>,
    orders: RwLock<HashMap<OrderId, Order>>,
    settled_lines: Mutex<HashSet<(OrderId, OrderItemId)>>,
    outcomes: RwLock<HashMap<OrderId, SettlementOutcome>>,
}

fn read<'a, T>(lock: &'a RwLock<T>, name: &str) -> Result<RwLockReadGuard<'a, T>, StoreError> {
    lock.read().map_err(|_| StoreError::Poisoned(name.to_string()))
}

fn write<'a, T>(lock: &'a RwLock<T>, name: &str) -> Result<RwLockWriteGuard<'a, T>, StoreError> {
    lock.write().map_err(|_| StoreError::Poisoned(name.to_string()))
}

fn lock<'a, T>(mutex: &'a Mutex<T>, name: &str) -> Result<MutexGuard<'a, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::Poisoned(name.to_string()))
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            products: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            settled_lines: Mutex::new(HashSet::new()),
            outcomes: RwLock::new(HashMap::new()),
        }
    }

    /// Get the number of products
    pub fn product_count(&self) -> Result<usize, StoreError> {
        Ok(read(&self.products, "products")?.len())
    }

    /// Get the number of orders
    pub fn order_count(&self) -> Result<usize, StoreError> {
        Ok(read(&self.orders, "orders")?.len())
    }

    /// Get the number of applied settlement lines
    pub fn settled_line_count(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.settled_lines, "settled_lines")?.len())
    }

    fn missing_product(id: ProductId) -> StoreError {
        StoreError::not_found("product", id.to_string())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Product Repository Implementation
// =============================================================================

#[async_trait]
impl ProductRepository for MemoryStore {
    async fn save(&self, product: &Product) -> Result<(), StoreError> {
        let mut products = write(&self.products, "products")?;
        // Stock of an existing product only moves through the stock operations,
        // and its revision never goes backwards
        let (stock, updated_at) = match products.get(&product.id) {
            Some(existing) => (
                existing.stock_quantity(),
                product.updated_at.max(next_revision(existing.updated_at)),
            ),
            None => (product.stock_quantity(), product.updated_at),
        };
        let stored = Product::restore(
            product.id,
            product.name.clone(),
            product.description.clone(),
            product.price,
            product.category.clone(),
            stock,
            product.created_at,
            updated_at,
        );
        products.insert(product.id, stored);
        Ok(())
    }

    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let products = read(&self.products, "products")?;
        Ok(products.get(&id).cloned())
    }

    async fn find_by_category(&self, category: &str) -> Result<Vec<Product>, StoreError> {
        let products = read(&self.products, "products")?;
        Ok(products
            .values()
            .filter(|p| p.category.eq_ignore_ascii_case(category))
            .cloned()
            .collect())
    }

    async fn increase_stock(&self, id: ProductId, quantity: Quantity) -> Result<Product, StoreError> {
        let mut products = write(&self.products, "products")?;
        let product = products.get_mut(&id).ok_or_else(|| Self::missing_product(id))?;
        product.increase_stock(quantity);
        Ok(product.clone())
    }
}

// =============================================================================
// Order Repository Implementation
// =============================================================================

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let mut orders = write(&self.orders, "orders")?;
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let orders = read(&self.orders, "orders")?;
        Ok(orders.get(&id).cloned())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let orders = read(&self.orders, "orders")?;
        let mut found: Vec<Order> = orders.values().filter(|o| o.user_id == user_id).cloned().collect();
        found.sort_by_key(|o| o.created_at);
        Ok(found)
    }

    async fn find_by_user_and_status(
        &self,
        user_id: UserId,
        status: OrderStatus,
    ) -> Result<Vec<Order>, StoreError> {
        let mut found = OrderRepository::find_by_user(self, user_id).await?;
        found.retain(|o| o.status() == status);
        Ok(found)
    }

    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let mut orders = write(&self.orders, "orders")?;
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("order", id.to_string()))?;

        if order.status() != from {
            return Ok(false);
        }
        match to {
            OrderStatus::Paid => order.process_payment()?,
            OrderStatus::Cancelled => order.cancel()?,
            OrderStatus::Pending => {
                return Err(DomainError::InvalidState(format!("Cannot move order {} back to PENDING", id)).into())
            },
        }
        Ok(true)
    }

    async fn find_paid_unsettled(&self) -> Result<Vec<Order>, StoreError> {
        // Lock order: orders, then outcomes
        let orders = read(&self.orders, "orders")?;
        let outcomes = read(&self.outcomes, "outcomes")?;
        let mut found: Vec<Order> = orders
            .values()
            .filter(|o| o.is_paid() && !outcomes.contains_key(&o.id))
            .cloned()
            .collect();
        found.sort_by_key(|o| o.updated_at);
        Ok(found)
    }
}

// =============================================================================
// Settlement Repository Implementation
// =============================================================================

#[async_trait]
impl SettlementRepository for MemoryStore {
    async fn settle_line(&self, line: &SettlementLine) -> Result<LineSettlement, StoreError> {
        // Lock order: lines, then products
        let mut lines = lock(&self.settled_lines, "settled_lines")?;
        let mut products = write(&self.products, "products")?;
        let product = products
            .get_mut(&line.product_id)
            .ok_or_else(|| Self::missing_product(line.product_id))?;

        if lines.contains(&(line.order_id, line.item_id)) {
            return Ok(LineSettlement::AlreadyApplied(product.clone()));
        }
        if !product.has_stock(line.quantity) {
            return Ok(LineSettlement::Insufficient(product.clone()));
        }

        product.decrease_stock(line.quantity)?;
        lines.insert((line.order_id, line.item_id));
        Ok(LineSettlement::Applied(product.clone()))
    }

    async fn release_line(&self, line: &SettlementLine) -> Result<Product, StoreError> {
        let mut lines = lock(&self.settled_lines, "settled_lines")?;
        let mut products = write(&self.products, "products")?;
        let product = products
            .get_mut(&line.product_id)
            .ok_or_else(|| Self::missing_product(line.product_id))?;

        if lines.remove(&(line.order_id, line.item_id)) {
            product.increase_stock(line.quantity);
        }
        Ok(product.clone())
    }

    async fn record_outcome(
        &self,
        order_id: OrderId,
        outcome: &SettlementOutcome,
    ) -> Result<(), StoreError> {
        let mut outcomes = write(&self.outcomes, "outcomes")?;
        outcomes.insert(order_id, outcome.clone());
        Ok(())
    }

    async fn find_outcome(&self, order_id: OrderId) -> Result<Option<SettlementOutcome>, StoreError> {
        let outcomes = read(&self.outcomes, "outcomes")?;
        Ok(outcomes.get(&order_id).cloned())
    }
}

// =============================================================================
// Store Implementation
// =============================================================================

impl Store for MemoryStore {
    fn products(&self) -> &dyn ProductRepository {
        self
    }

    fn orders(&self) -> &dyn OrderRepository {
        self
    }

    fn settlements(&self) -> &dyn SettlementRepository {
        self
    }
}

// =============================================================================
// Tests
// =============================================================================
