//! Emporium Fulfillment
//!
//! The order-to-stock pipeline:
//!
//! ```text
//! create_order ─► Order (PENDING) ─► pay_order ─► Order (PAID) ─► OrderPaidEvent
//!                                                                     │
//!                                                                     ▼
//!                         Search ◄── InventoryLedger ◄── StockReconciler (ack/nack)
//! ```
//!
//! - [`OrderOrchestrator`]: caller-facing `create_order` / `pay_order`
//! - [`InventoryLedger`]: authoritative stock mutations and settlement
//! - [`StockReconciler`]: idempotent handling of order-paid events
//! - [`ReconcilerWorker`]: subscription loop acknowledging deliveries

pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod reconciler;
pub mod worker;

pub use error::{FulfillmentError, FulfillmentResult};
pub use ledger::{InventoryLedger, SettlementPolicy};
pub use orchestrator::{OrderItemRequest, OrderOrchestrator};
pub use reconciler::{ReconcileOutcome, StockReconciler};
pub use worker::ReconcilerWorker;
