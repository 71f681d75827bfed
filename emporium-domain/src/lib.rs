//! Emporium Domain Layer
//!
//! Pure domain logic with zero I/O dependencies.
//! Contains the product and order entities, the order state machine,
//! the events carried between the orchestrator and the reconciler,
//! and the compensation report raised on stock shortfalls.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod compensation;
pub mod context;
pub mod entities;
pub mod events;
pub mod value_objects;

// Re-export commonly used types
pub use compensation::{CompensationReport, CompensationStage, SettlementOutcome, StockShortfall};
pub use context::CallerContext;
pub use entities::{
    next_revision, Order, OrderId, OrderItem, OrderItemId, OrderStatus, Product, ProductDetails,
    ProductId, UserId,
};
pub use events::OrderPaidEvent;
pub use value_objects::{DomainError, Money, Quantity};
