//! Fulfillment error taxonomy.
//!
//! `NotFound`, `InvalidState`, `InsufficientStock` and `Validation` are
//! business failures: reported to the caller, never retried. `Unexpected`
//! covers infrastructure failures and is the only retryable class.

use emporium_channel::ChannelError;
use emporium_domain::{CompensationReport, DomainError};
use emporium_store::StoreError;
use thiserror::Error;

/// Errors raised by fulfillment operations.
#[derive(Debug, Clone, Error)]
pub enum FulfillmentError {
    /// Unknown product or order id
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Transition attempted outside its legal source state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Stock could not cover one or more items
    #[error("Insufficient stock for order {}:\n{}", .0.order_id, .0)]
    InsufficientStock(CompensationReport),

    /// Rejected input (price, quantity, blank fields)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Persistence or channel failure
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl FulfillmentError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// True only for infrastructure failures, which may succeed on redelivery.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FulfillmentError::Unexpected(_))
    }
}

impl From<DomainError> for FulfillmentError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::InvalidState(message) => FulfillmentError::InvalidState(message),
            DomainError::ItemNotFound(id) => FulfillmentError::not_found("order item", id),
            DomainError::InvalidPrice(_)
            | DomainError::InvalidQuantity(_)
            | DomainError::InvalidProduct(_) => FulfillmentError::Validation(error.to_string()),
            DomainError::StockUnderflow { .. } => FulfillmentError::Unexpected(error.to_string()),
        }
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity_type, id } => FulfillmentError::NotFound { entity: entity_type, id },
            StoreError::Domain(domain) => domain.into(),
            other => FulfillmentError::Unexpected(other.to_string()),
        }
    }
}

impl From<ChannelError> for FulfillmentError {
    fn from(error: ChannelError) -> Self {
        FulfillmentError::Unexpected(error.to_string())
    }
}

/// Result type for fulfillment operations.
pub type FulfillmentResult<T> = Result<T, FulfillmentError>;
