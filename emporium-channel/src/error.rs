//! Channel errors.

use thiserror::Error;

/// Errors raised by the event channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Broker was closed
    #[error("Channel closed")]
    Closed,

    /// Too many unacknowledged messages on the topic
    #[error("Backlog full on topic {topic} (limit {limit})")]
    BacklogFull { topic: String, limit: usize },

    /// Ack/nack for a delivery that is no longer in flight
    /// (it timed out and was redelivered, or was already settled)
    #[error("Stale delivery: topic {topic}, offset {offset}")]
    StaleDelivery { topic: String, offset: u64 },

    /// Broker could not be reached
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    /// Payload could not be decoded into the expected type
    #[error("Decode error: {0}")]
    Decode(String),

    /// Internal lock poisoned
    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}
