//! PostgreSQL store implementation.
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.
//!
//! Stock decrements are a single conditional UPDATE
//! (`... WHERE stock_quantity >= $n`), so concurrent settlements for the same
//! product serialize on the row lock and can never drive stock negative.
//! Order status changes use the same shape (`... WHERE status = $from`).

use crate::error::StoreError;
use crate::repository::{
    LineSettlement, OrderRepository, ProductRepository, SettlementLine, SettlementRepository, Store,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use emporium_domain::{
    Money, Order, OrderId, OrderItem, OrderStatus, Product, ProductId, Quantity,
    SettlementOutcome, UserId,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

const PRODUCT_COLUMNS: &str =
    "product_id, name, description, price, category, stock_quantity, created_at, updated_at";

const ORDER_COLUMNS: &str = "order_id, user_id, status, created_at, updated_at";

/// New `updated_at` for a row being changed: strictly after the stored one.
/// `clock_timestamp()` rather than `now()`, which is fixed at transaction start.
const NEXT_REVISION: &str =
    "GREATEST(date_trunc('microseconds', clock_timestamp()), updated_at + interval '1 microsecond')";

/// PostgreSQL-backed store.
pub struct PgStore {
    /// PostgreSQL connection pool
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {}", e)))
    }

    /// Get a reference to the underlying pool (for testing).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn product_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        id: ProductId,
    ) -> Result<Product, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM products WHERE product_id = $1", PRODUCT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| StoreError::not_found("product", id.to_string()))?;
        parse_product_row(&row)
    }

    async fn load_items(&self, order_id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, order_id, product_id, product_name,
                   quantity, unit_price, total_price
            FROM order_items
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_item_row).collect()
    }

    async fn hydrate_orders(&self, rows: Vec<PgRow>) -> Result<Vec<Order>, StoreError> {
        let mut orders = Vec::with_capacity(rows.len());
        for row in &rows {
            let header = parse_order_row(row)?;
            let items = self.load_items(header.order_id).await?;
            orders.push(header.into_order(items));
        }
        Ok(orders)
    }
}

// =============================================================================
// Row parsing
// =============================================================================

fn to_quantity(value: i32) -> Result<Quantity, StoreError> {
    let units = u32::try_from(value)
        .map_err(|_| StoreError::Deserialization(format!("Negative quantity: {}", value)))?;
    Ok(Quantity::new(units)?)
}

fn to_stock(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Deserialization(format!("Negative stock: {}", value)))
}

fn to_db_int(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Serialization(format!("Value out of range: {}", value)))
}

fn parse_product_row(row: &PgRow) -> Result<Product, StoreError> {
    let price: Decimal = row.try_get("price")?;
    Ok(Product::restore(
        row.try_get("product_id")?,
        row.try_get("name")?,
        row.try_get("description")?,
        Money::new(price)?,
        row.try_get("category")?,
        to_stock(row.try_get("stock_quantity")?)?,
        row.try_get("created_at")?,
        row.try_get("updated_at")?,
    ))
}

fn parse_item_row(row: &PgRow) -> Result<OrderItem, StoreError> {
    Ok(OrderItem {
        id: row.try_get("item_id")?,
        order_id: row.try_get("order_id")?,
        product_id: row.try_get("product_id")?,
        product_name: row.try_get("product_name")?,
        quantity: to_quantity(row.try_get("quantity")?)?,
        unit_price: Money::new(row.try_get("unit_price")?)?,
        total_price: Money::new(row.try_get("total_price")?)?,
    })
}

/// Order columns without items.
struct OrderRow {
    order_id: OrderId,
    user_id: UserId,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, items: Vec<OrderItem>) -> Order {
        Order::restore(self.order_id, self.user_id, items, self.status, self.created_at, self.updated_at)
    }
}

fn parse_order_row(row: &PgRow) -> Result<OrderRow, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(OrderRow {
        order_id: row.try_get("order_id")?,
        user_id: row.try_get("user_id")?,
        status: OrderStatus::parse(&status)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// =============================================================================
// Product Repository Implementation
// =============================================================================

#[async_trait]
impl ProductRepository for PgStore {
    async fn save(&self, product: &Product) -> Result<(), StoreError> {
        // stock_quantity is only written on insert; updates go through the stock operations
        sqlx::query(
            r#"
            INSERT INTO products (
                product_id, name, description, price, category,
                stock_quantity, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (product_id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                price = EXCLUDED.price,
                category = EXCLUDED.category,
                updated_at = GREATEST(EXCLUDED.updated_at, products.updated_at + interval '1 microsecond')
            "#,
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.as_decimal())
        .bind(&product.category)
        .bind(to_db_int(product.stock_quantity())?)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: ProductId) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM products WHERE product_id = $1", PRODUCT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_product_row).transpose()
    }

    async fn find_by_category(&self, category: &str) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM products WHERE lower(category) = lower($1) ORDER BY name",
            PRODUCT_COLUMNS
        ))
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_product_row).collect()
    }

    async fn increase_stock(&self, id: ProductId, quantity: Quantity) -> Result<Product, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2, updated_at = {}
            WHERE product_id = $1
            RETURNING {}
            "#,
            NEXT_REVISION, PRODUCT_COLUMNS
        ))
        .bind(id)
        .bind(to_db_int(quantity.get())?)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("product", id.to_string()))?;
        parse_product_row(&row)
    }
}

// =============================================================================
// Order Repository Implementation
// =============================================================================

#[async_trait]
impl OrderRepository for PgStore {
    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (order_id, user_id, total_amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (order_id) DO UPDATE SET
                total_amount = EXCLUDED.total_amount,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.total_amount().as_decimal())
        .bind(order.status().as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM order_items WHERE order_id = $1")
            .bind(order.id)
            .execute(&mut *tx)
            .await?;

        for (position, item) in order.items().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    item_id, order_id, product_id, product_name,
                    quantity, unit_price, total_price, position
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id)
            .bind(order.id)
            .bind(item.product_id)
            .bind(&item.product_name)
            .bind(to_db_int(item.quantity.get())?)
            .bind(item.unit_price.as_decimal())
            .bind(item.total_price.as_decimal())
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(order_id = %order.id, status = %order.status(), "Order saved");
        Ok(())
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE order_id = $1", ORDER_COLUMNS))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.hydrate_orders(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, user_id, status, created_at, updated_at
            FROM orders WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_orders(rows).await
    }

    async fn find_by_user_and_status(
        &self,
        user_id: UserId,
        status: OrderStatus,
    ) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, user_id, status, created_at, updated_at
            FROM orders WHERE user_id = $1 AND status = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_orders(rows).await
    }

    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let changed = sqlx::query(&format!(
            "UPDATE orders SET status = $3, updated_at = {} WHERE order_id = $1 AND status = $2",
            NEXT_REVISION
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if changed == 0 {
            let exists = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM orders WHERE order_id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
            if exists == 0 {
                return Err(StoreError::not_found("order", id.to_string()));
            }
        }
        debug!(order_id = %id, %from, %to, changed, "Order status transition");
        Ok(changed > 0)
    }

    async fn find_paid_unsettled(&self) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT o.order_id, o.user_id, o.status, o.created_at, o.updated_at
            FROM orders o
            WHERE o.status = 'PAID'
              AND NOT EXISTS (
                  SELECT 1 FROM settlement_outcomes s WHERE s.order_id = o.order_id
              )
            ORDER BY o.updated_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_orders(rows).await
    }
}

// =============================================================================
// Settlement Repository Implementation
// =============================================================================

#[async_trait]
impl SettlementRepository for PgStore {
    async fn settle_line(&self, line: &SettlementLine) -> Result<LineSettlement, StoreError> {
        let mut tx = self.pool.begin().await?;
        let quantity = to_db_int(line.quantity.get())?;

        let claimed = sqlx::query(
            r#"
            INSERT INTO settlement_lines (order_id, item_id, product_id, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (order_id, item_id) DO NOTHING
            RETURNING order_id
            "#,
        )
        .bind(line.order_id)
        .bind(line.item_id)
        .bind(line.product_id)
        .bind(quantity)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            let product = Self::product_in_tx(&mut tx, line.product_id).await?;
            tx.commit().await?;
            return Ok(LineSettlement::AlreadyApplied(product));
        }

        let updated = sqlx::query(&format!(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $2, updated_at = {}
            WHERE product_id = $1 AND stock_quantity > 0 AND stock_quantity >= $2
            RETURNING {}
            "#,
            NEXT_REVISION, PRODUCT_COLUMNS
        ))
        .bind(line.product_id)
        .bind(quantity)
        .fetch_optional(&mut *tx)
        .await?;

        match updated {
            Some(row) => {
                let product = parse_product_row(&row)?;
                tx.commit().await?;
                Ok(LineSettlement::Applied(product))
            },
            None => {
                tx.rollback().await?;
                let product = ProductRepository::find_by_id(self, line.product_id)
                    .await?
                    .ok_or_else(|| StoreError::not_found("product", line.product_id.to_string()))?;
                Ok(LineSettlement::Insufficient(product))
            },
        }
    }

    async fn release_line(&self, line: &SettlementLine) -> Result<Product, StoreError> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM settlement_lines WHERE order_id = $1 AND item_id = $2")
            .bind(line.order_id)
            .bind(line.item_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if removed > 0 {
            sqlx::query(&format!(
                "UPDATE products SET stock_quantity = stock_quantity + $2, updated_at = {} WHERE product_id = $1",
                NEXT_REVISION
            ))
            .bind(line.product_id)
            .bind(to_db_int(line.quantity.get())?)
            .execute(&mut *tx)
            .await?;
        }

        let product = Self::product_in_tx(&mut tx, line.product_id).await?;
        tx.commit().await?;
        Ok(product)
    }

    async fn record_outcome(
        &self,
        order_id: OrderId,
        outcome: &SettlementOutcome,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO settlement_outcomes (order_id, outcome, detail)
            VALUES ($1, $2, $3)
            ON CONFLICT (order_id) DO UPDATE SET
                outcome = EXCLUDED.outcome,
                detail = EXCLUDED.detail,
                recorded_at = now()
            "#,
        )
        .bind(order_id)
        .bind(outcome.name())
        .bind(serde_json::to_value(outcome)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_outcome(&self, order_id: OrderId) -> Result<Option<SettlementOutcome>, StoreError> {
        let detail = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT detail FROM settlement_outcomes WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        detail
            .map(|value| {
                serde_json::from_value(value).map_err(|e| StoreError::Deserialization(e.to_string()))
            })
            .transpose()
    }
}

// =============================================================================
// Store Implementation
// =============================================================================

impl Store for PgStore {
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
