//! Inventory Ledger
//!
//! Authoritative owner of per-product stock. Every decrement goes through the
//! store's compare-and-decrement primitive, so concurrent settlements for the
//! same product can never drive stock below zero. Every mutation is followed
//! by a best-effort search index sync.

use crate::error::{FulfillmentError, FulfillmentResult};
use emporium_domain::{
    CompensationReport, CompensationStage, Order, OrderItemId, Product, ProductDetails, ProductId,
    Quantity, StockShortfall,
};
use emporium_search::SearchSynchronizer;
use emporium_store::{LineSettlement, SettlementLine, Store};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happens to lines already decremented when a later line is short.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SettlementPolicy {
    /// Lines before the short one stay decremented; later lines are not applied.
    #[default]
    BestEffort,
    /// Lines already decremented for the order are released again.
    AllOrNothing,
}

impl fmt::Display for SettlementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementPolicy::BestEffort => write!(f, "best-effort"),
            SettlementPolicy::AllOrNothing => write!(f, "all-or-nothing"),
        }
    }
}

impl FromStr for SettlementPolicy {
    type Err = FulfillmentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "best-effort" | "best_effort" => Ok(SettlementPolicy::BestEffort),
            "all-or-nothing" | "all_or_nothing" => Ok(SettlementPolicy::AllOrNothing),
            other => Err(FulfillmentError::Validation(format!("Unknown settlement policy: {}", other))),
        }
    }
}

/// Stock mutations and order settlement.
pub struct InventoryLedger<S: Store + ?Sized> {
    store: Arc<S>,
    search: SearchSynchronizer,
    policy: SettlementPolicy,
}

impl<S: Store + ?Sized> InventoryLedger<S> {
    pub fn new(store: Arc<S>, search: SearchSynchronizer, policy: SettlementPolicy) -> Self {
        Self { store, search, policy }
    }

    pub fn policy(&self) -> SettlementPolicy {
        self.policy
    }

    /// Register a new product with its initial stock.
    pub async fn create_product(&self, details: ProductDetails, stock: u32) -> FulfillmentResult<Product> {
        let product = Product::new(details, stock)?;
        self.store.products().save(&product).await?;
        info!(product_id = %product.id, name = %product.name, stock, "Product created");

        self.search.sync(&product).await;
        Ok(product)
    }

    /// Replace descriptive fields. Stock is left untouched.
    pub async fn update_details(&self, id: ProductId, details: ProductDetails) -> FulfillmentResult<Product> {
        let mut product = self.get_product(id).await?;
        product.update_details(details)?;
        self.store.products().save(&product).await?;
        // Stock may have moved since the read; index the stored row
        let product = self.get_product(id).await?;
        info!(product_id = %id, "Product details updated");

        self.search.sync(&product).await;
        Ok(product)
    }

    pub async fn get_product(&self, id: ProductId) -> FulfillmentResult<Product> {
        self.store
            .products()
            .find_by_id(id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("product", id))
    }

    pub async fn products_in_category(&self, category: &str) -> FulfillmentResult<Vec<Product>> {
        Ok(self.store.products().find_by_category(category).await?)
    }

    /// True iff stock > 0 and stock >= quantity. Advisory only: the answer
    /// may be stale by the time the caller acts on it.
    pub async fn has_stock(&self, id: ProductId, quantity: Quantity) -> FulfillmentResult<bool> {
        Ok(self.get_product(id).await?.has_stock(quantity))
    }

    /// Restock a product.
    pub async fn increase_stock(&self, id: ProductId, quantity: Quantity) -> FulfillmentResult<Product> {
        let product = self.store.products().increase_stock(id, quantity).await?;
        info!(product_id = %id, added = quantity.get(), stock = product.stock_quantity(), "Stock increased");

        self.search.sync(&product).await;
        Ok(product)
    }

    /// Decrement stock for every item of a paid order.
    ///
    /// Lines are applied in item order. Each line is recorded with the
    /// decrement, so settling the same order again skips lines already
    /// applied. On the first short line settlement stops and fails with
    /// `InsufficientStock`; what happens to earlier lines depends on the
    /// [`SettlementPolicy`].
    ///
    /// Returns the ids of the settled items.
    pub async fn settle_stock(&self, order: &Order) -> FulfillmentResult<Vec<OrderItemId>> {
        let mut settled: Vec<SettlementLine> = Vec::with_capacity(order.items().len());

        for (position, item) in order.items().iter().enumerate() {
            let line = SettlementLine::for_item(order.id, item);

            match self.store.settlements().settle_line(&line).await? {
                LineSettlement::Applied(product) => {
                    debug!(
                        order_id = %order.id,
                        product_id = %product.id,
                        quantity = line.quantity.get(),
                        stock = product.stock_quantity(),
                        "Stock decremented"
                    );
                    self.search.sync(&product).await;
                    settled.push(line);
                },
                LineSettlement::AlreadyApplied(_) => {
                    debug!(order_id = %order.id, item_id = %item.id, "Line already settled, skipping");
                    settled.push(line);
                },
                LineSettlement::Insufficient(product) => {
                    let report = self.shortfall_report(order, position, &product).await?;
                    if self.policy == SettlementPolicy::AllOrNothing {
                        self.release(&settled).await?;
                    }
                    return Err(FulfillmentError::InsufficientStock(report));
                },
            }
        }

        Ok(settled.into_iter().map(|line| line.item_id).collect())
    }

    /// Undo applied lines, newest first.
    async fn release(&self, lines: &[SettlementLine]) -> FulfillmentResult<()> {
        for line in lines.iter().rev() {
            let product = self.store.settlements().release_line(line).await?;
            warn!(
                order_id = %line.order_id,
                product_id = %line.product_id,
                quantity = line.quantity.get(),
                stock = product.stock_quantity(),
                "Settled line released"
            );
            self.search.sync(&product).await;
        }
        Ok(())
    }

    /// Report the short line at `position` plus every later line that the
    /// current stock would not cover either.
    async fn shortfall_report(
        &self,
        order: &Order,
        position: usize,
        short: &Product,
    ) -> FulfillmentResult<CompensationReport> {
        let items = order.items();
        let mut shortfalls = vec![StockShortfall {
            product_id: short.id,
            product_name: items[position].product_name.clone(),
            available: short.stock_quantity(),
            requested: items[position].quantity.get(),
        }];

        for item in &items[position + 1..] {
            let Some(product) = self.store.products().find_by_id(item.product_id).await? else {
                continue;
            };
            if item.quantity.get() > product.stock_quantity() {
                shortfalls.push(StockShortfall {
                    product_id: product.id,
                    product_name: item.product_name.clone(),
                    available: product.stock_quantity(),
                    requested: item.quantity.get(),
                });
            }
        }

        Ok(CompensationReport::new(order.id, CompensationStage::Settlement, shortfalls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emporium_domain::Money;
    use emporium_search::{MemorySearchIndex, SearchIndex};
    use emporium_store::{MemoryStore, ProductRepository};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        index: Arc<MemorySearchIndex>,
        ledger: InventoryLedger<MemoryStore>,
    }

    fn fixture(policy: SettlementPolicy) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let index = Arc::new(MemorySearchIndex::new());
        let search = SearchSynchronizer::direct(index.clone() as Arc<dyn SearchIndex>);
        let ledger = InventoryLedger::new(store.clone(), search, policy);
        Fixture { store, index, ledger }
    }

    fn details(name: &str) -> ProductDetails {
        ProductDetails {
            name: name.to_string(),
            description: format!("{} description", name),
            price: Money::new(dec!(10)).unwrap(),
            category: "home".to_string(),
        }
    }

    fn qty(n: u32) -> Quantity {
        Quantity::new(n).unwrap()
    }

    fn paid_order(lines: &[(&Product, u32)]) -> Order {
        let mut order = Order::new(Uuid::now_v7());
        for (product, quantity) in lines {
            order.add_item(product, qty(*quantity)).unwrap();
        }
        order.process_payment().unwrap();
        order
    }

    async fn stock(f: &Fixture, id: ProductId) -> u32 {
        ProductRepository::find_by_id(f.store.as_ref(), id)
            .await
            .unwrap()
            .unwrap()
            .stock_quantity()
    }

    #[tokio::test]
    async fn test_create_product_syncs_search() {
        let f = fixture(SettlementPolicy::BestEffort);
        let product = f.ledger.create_product(details("Vase"), 4).await.unwrap();

        assert_eq!(f.index.get(product.id).unwrap().stock_quantity, 4);
    }

    #[tokio::test]
    async fn test_create_product_rejects_blank_name() {
        let f = fixture(SettlementPolicy::BestEffort);
        let result = f.ledger.create_product(details("  "), 4).await;

        assert!(matches!(result, Err(FulfillmentError::Validation(_))));
        assert!(f.index.is_empty());
    }

    #[tokio::test]
    async fn test_update_details_keeps_stock() {
        let f = fixture(SettlementPolicy::BestEffort);
        let product = f.ledger.create_product(details("Vase"), 4).await.unwrap();

        let updated = f.ledger.update_details(product.id, details("Tall Vase")).await.unwrap();

        assert_eq!(updated.name, "Tall Vase");
        assert_eq!(updated.stock_quantity(), 4);
        assert_eq!(f.index.get(product.id).unwrap().name, "Tall Vase");
    }

    #[tokio::test]
    async fn test_has_stock_and_increase() {
        let f = fixture(SettlementPolicy::BestEffort);
        let product = f.ledger.create_product(details("Vase"), 0).await.unwrap();

        assert!(!f.ledger.has_stock(product.id, qty(1)).await.unwrap());

        let restocked = f.ledger.increase_stock(product.id, qty(3)).await.unwrap();
        assert_eq!(restocked.stock_quantity(), 3);
        assert!(f.ledger.has_stock(product.id, qty(3)).await.unwrap());
        assert!(!f.ledger.has_stock(product.id, qty(4)).await.unwrap());
        assert_eq!(f.index.get(product.id).unwrap().stock_quantity, 3);
    }

    #[tokio::test]
    async fn test_unknown_product_is_not_found() {
        let f = fixture(SettlementPolicy::BestEffort);
        let result = f.ledger.has_stock(Uuid::now_v7(), qty(1)).await;

        assert!(matches!(result, Err(FulfillmentError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_settle_decrements_every_line() {
        let f = fixture(SettlementPolicy::BestEffort);
        let lamp = f.ledger.create_product(details("Lamp"), 10).await.unwrap();
        let rug = f.ledger.create_product(details("Rug"), 2).await.unwrap();
        let order = paid_order(&[(&lamp, 4), (&rug, 2)]);

        let lines = f.ledger.settle_stock(&order).await.unwrap();

        assert_eq!(lines.len(), 2);
        assert_eq!(stock(&f, lamp.id).await, 6);
        assert_eq!(stock(&f, rug.id).await, 0);
        assert_eq!(f.index.get(rug.id).unwrap().stock_quantity, 0);
    }

    #[tokio::test]
    async fn test_settle_twice_does_not_double_decrement() {
        let f = fixture(SettlementPolicy::BestEffort);
        let lamp = f.ledger.create_product(details("Lamp"), 10).await.unwrap();
        let order = paid_order(&[(&lamp, 4)]);

        f.ledger.settle_stock(&order).await.unwrap();
        f.ledger.settle_stock(&order).await.unwrap();

        assert_eq!(stock(&f, lamp.id).await, 6);
    }

    #[tokio::test]
    async fn test_best_effort_keeps_earlier_lines() {
        let f = fixture(SettlementPolicy::BestEffort);
        let lamp = f.ledger.create_product(details("Lamp"), 10).await.unwrap();
        let rug = f.ledger.create_product(details("Rug"), 1).await.unwrap();
        let vase = f.ledger.create_product(details("Vase"), 5).await.unwrap();
        let order = paid_order(&[(&lamp, 3), (&rug, 2), (&vase, 1)]);

        let result = f.ledger.settle_stock(&order).await;

        let report = match result {
            Err(FulfillmentError::InsufficientStock(report)) => report,
            other => panic!("expected InsufficientStock, got {:?}", other),
        };
        assert_eq!(report.stage, CompensationStage::Settlement);
        assert_eq!(report.to_string(), "[Product:Rug, Available: 1, Requested: 2]");
        assert_eq!(stock(&f, lamp.id).await, 7);
        assert_eq!(stock(&f, rug.id).await, 1);
        // Lines after the short one are not applied
        assert_eq!(stock(&f, vase.id).await, 5);
    }

    #[tokio::test]
    async fn test_all_or_nothing_releases_earlier_lines() {
        let f = fixture(SettlementPolicy::AllOrNothing);
        let lamp = f.ledger.create_product(details("Lamp"), 10).await.unwrap();
        let rug = f.ledger.create_product(details("Rug"), 1).await.unwrap();
        let order = paid_order(&[(&lamp, 3), (&rug, 2)]);

        let result = f.ledger.settle_stock(&order).await;

        assert!(matches!(result, Err(FulfillmentError::InsufficientStock(_))));
        assert_eq!(stock(&f, lamp.id).await, 10);
        assert_eq!(stock(&f, rug.id).await, 1);
        assert_eq!(f.index.get(lamp.id).unwrap().stock_quantity, 10);
        assert_eq!(f.store.settled_line_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_report_lists_later_short_lines() {
        let f = fixture(SettlementPolicy::BestEffort);
        let rug = f.ledger.create_product(details("Rug"), 1).await.unwrap();
        let vase = f.ledger.create_product(details("Vase"), 0).await.unwrap();
        let order = paid_order(&[(&rug, 2), (&vase, 1)]);

        let Err(FulfillmentError::InsufficientStock(report)) = f.ledger.settle_stock(&order).await else {
            panic!("expected InsufficientStock");
        };

        assert_eq!(report.shortfalls.len(), 2);
        assert_eq!(report.shortfalls[1].product_name, "Vase");
        assert_eq!(report.shortfalls[1].available, 0);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("best-effort".parse::<SettlementPolicy>().unwrap(), SettlementPolicy::BestEffort);
        assert_eq!("ALL_OR_NOTHING".parse::<SettlementPolicy>().unwrap(), SettlementPolicy::AllOrNothing);
        assert!("sometimes".parse::<SettlementPolicy>().is_err());
        assert_eq!(SettlementPolicy::default().to_string(), "best-effort");
    }
}
