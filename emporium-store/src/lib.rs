//! Emporium Storage Layer
//!
//! Provides persistence for products, orders, and settlement markers.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the storage interface (ports)
//! - **In-memory store**: Fast implementation for testing and development
//! - **PostgreSQL store**: Production implementation (feature `postgres`)
//!
//! Stock and order status are never written as "read, check, save". Both
//! adapters expose conditional writes (`settle_line`, `transition_status`) so
//! the check and the write happen as one step.
//!
//! # Usage
//!
//! ```rust
//! use emporium_store::{LineSettlement, MemoryStore, ProductRepository, SettlementLine, SettlementRepository};
//! use emporium_domain::{Money, Order, Product, ProductDetails, Quantity};
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!
//!     let product = Product::new(
//!         ProductDetails {
//!             name: "Kettle".to_string(),
//!             description: "1.7L".to_string(),
//!             price: Money::ZERO,
//!             category: "kitchen".to_string(),
//!         },
//!         2,
//!     )
//!     .unwrap();
//!     ProductRepository::save(&store, &product).await.unwrap();
//!
//!     let mut order = Order::new(Uuid::now_v7());
//!     order.add_item(&product, Quantity::new(3).unwrap()).unwrap();
//!
//!     let line = SettlementLine::for_item(order.id, &order.items()[0]);
//!     let result = store.settle_line(&line).await.unwrap();
//!     assert!(matches!(result, LineSettlement::Insufficient(_)));
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use repository::{
    LineSettlement, OrderRepository, ProductRepository, SettlementLine, SettlementRepository,
    Store,
};
