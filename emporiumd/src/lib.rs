//! Emporium Daemon Library
//!
//! Runtime wiring for the order fulfillment pipeline.
//!
//! # Architecture
//!
//! ```text
//! caller → OrderOrchestrator → Store
//!               │ persist-then-publish
//!               ▼
//!          MemoryBroker (order-paid, partitioned by order id)
//!               │ at-least-once
//!               ▼
//!     ReconcilerWorker × N → StockReconciler → InventoryLedger → Store
//!                                                   │
//!                                                   ▼
//!                                      SearchSynchronizer (queued)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use emporiumd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_memory(config);
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod daemon;
pub mod error;

// Re-exports for convenience
pub use config::{ChannelConfig, Config, DatabaseConfig, Environment, LogFormat, SearchConfig};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
