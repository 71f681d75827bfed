//! Search index port and in-memory adapter.

use crate::document::ProductDocument;
use crate::error::SearchError;
use async_trait::async_trait;
use emporium_domain::ProductId;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Secondary index receiving product documents.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or replace the document for `document.id`.
    ///
    /// `updated_at` is the document version: a document older than the one
    /// already indexed is dropped, so out-of-order syncs cannot regress it.
    async fn upsert(&self, document: &ProductDocument) -> Result<(), SearchError>;
}

/// In-memory index, inspectable from tests.
#[derive(Default)]
pub struct MemorySearchIndex {
    documents: RwLock<HashMap<ProductId, ProductDocument>>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current document for a product, if indexed.
    pub fn get(&self, id: ProductId) -> Option<ProductDocument> {
        self.documents.read().ok()?.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn upsert(&self, document: &ProductDocument) -> Result<(), SearchError> {
        let mut documents = self
            .documents
            .write()
            .map_err(|e| SearchError::Unavailable(format!("Lock poisoned: {}", e)))?;
        if let Some(current) = documents.get(&document.id) {
            if current.updated_at > document.updated_at {
                debug!(product_id = %document.id, "Ignoring stale document");
                return Ok(());
            }
        }
        documents.insert(document.id, document.clone());
        Ok(())
    }
}
