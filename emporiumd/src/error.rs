//! Daemon error types.

use emporium_channel::ChannelError;
use emporium_fulfillment::FulfillmentError;
use emporium_store::StoreError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Event channel error
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Fulfillment error
    #[error("Fulfillment error: {0}")]
    Fulfillment(#[from] FulfillmentError),

    /// A background task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(String),
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
