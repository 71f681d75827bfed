//! Search index errors

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("Search request failed: {0}")]
    RequestFailed(String),

    #[error("Search index rejected document {id}: HTTP {status}: {body}")]
    Rejected { id: String, status: u16, body: String },

    #[error("Search request timed out")]
    Timeout,

    #[error("Search index unavailable: {0}")]
    Unavailable(String),
}
