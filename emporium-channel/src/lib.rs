//! Event Channel
//!
//! Carries "order paid" notifications from the orchestrator to the stock
//! reconciler with:
//! - At-least-once delivery (unacknowledged deliveries are redelivered)
//! - Per-key ordering (one in-flight delivery per partition)
//! - Idempotent publish via semantic payload hashing
//!
//! # Usage
//!
//! ```rust
//! use emporium_channel::{BrokerConfig, EventChannel, MemoryBroker};
//!
//! # async fn example() -> Result<(), emporium_channel::ChannelError> {
//! let broker = MemoryBroker::new(BrokerConfig::default());
//! let subscription = broker.subscribe("order-paid").await?;
//!
//! broker
//!     .publish("order-paid", "order-1", serde_json::json!({ "order_id": "order-1" }))
//!     .await?;
//!
//! if let Some(delivery) = subscription.next().await {
//!     assert_eq!(delivery.key, "order-1");
//!     delivery.ack()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod error;
pub mod idempotency;
pub mod producer;

pub use broker::{AckHandle, BrokerConfig, Delivery, MemoryBroker, Subscription};
pub use error::ChannelError;
pub use idempotency::compute_idempotency_key;
pub use producer::OrderEventProducer;

use async_trait::async_trait;

/// Publish/subscribe boundary used by the orchestrator and the reconciler.
///
/// Every subscription to a topic belongs to the same consumer group: each
/// published message is handed to exactly one subscriber at a time.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Publish `payload` under `key`. Returns the offset assigned to the message.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: serde_json::Value,
    ) -> Result<u64, ChannelError>;

    /// Subscribe to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, ChannelError>;
}
