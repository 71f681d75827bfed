//! Typed producer for order events.

use crate::EventChannel;
use emporium_domain::OrderPaidEvent;
use std::sync::Arc;
use tracing::{error, info};

/// Publishes [`OrderPaidEvent`]s keyed by order id.
///
/// Publication is fire-and-forget: failures are logged, never returned, so a
/// paid order is never reported as failed because the channel was down.
#[derive(Clone)]
pub struct OrderEventProducer {
    channel: Arc<dyn EventChannel>,
    topic: String,
}

impl OrderEventProducer {
    pub fn new(channel: Arc<dyn EventChannel>, topic: impl Into<String>) -> Self {
        Self { channel, topic: topic.into() }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish the event. Returns the assigned offset, or `None` if publishing failed.
    pub async fn publish_order_paid(&self, event: &OrderPaidEvent) -> Option<u64> {
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(order_id = %event.order_id, error = %e, "Failed to encode order paid event");
                return None;
            },
        };

        match self.channel.publish(&self.topic, &event.key(), payload).await {
            Ok(offset) => {
                info!(
                    order_id = %event.order_id,
                    topic = %self.topic,
                    offset,
                    "Order paid event published"
                );
                Some(offset)
            },
            Err(e) => {
                error!(
                    order_id = %event.order_id,
                    topic = %self.topic,
                    error = %e,
                    "Failed to publish order paid event"
                );
                None
            },
        }
    }
}
