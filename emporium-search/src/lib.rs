//! Search Index Synchronizer
//!
//! One-way, best-effort propagation of product state into a secondary search
//! index. The authoritative write path never waits on or fails because of
//! the index.

pub mod document;
pub mod error;
pub mod http;
pub mod index;
pub mod sync;

pub use document::ProductDocument;
pub use error::SearchError;
pub use http::HttpSearchIndex;
pub use index::{MemorySearchIndex, SearchIndex};
pub use sync::{RetryPolicy, SearchSyncWorker, SearchSynchronizer};
