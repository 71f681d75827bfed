//! HTTP adapter for Elasticsearch-compatible indexes.
//!
//! Documents are written with `PUT {base_url}/{index}/_doc/{id}` using
//! external versioning keyed on `updated_at` in microseconds. A 409 means the
//! index already holds a newer document and is not an error.

use crate::document::ProductDocument;
use crate::error::SearchError;
use crate::index::SearchIndex;
use async_trait::async_trait;
use emporium_domain::ProductId;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Request timeout in seconds
const REQUEST_TIMEOUT_SECS: u64 = 5;

/// Search index reached over HTTP.
pub struct HttpSearchIndex {
    /// HTTP client
    client: Client,
    /// Base URL without trailing slash
    base_url: String,
    /// Index name
    index: String,
}

impl HttpSearchIndex {
    pub fn new(base_url: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index: index.into(),
        }
    }

    fn document_url(&self, id: ProductId) -> String {
        format!("{}/{}/_doc/{}", self.base_url, self.index, id)
    }

    /// Document URL with external versioning: the index rejects a write whose
    /// version is not above the stored one.
    fn versioned_url(&self, document: &ProductDocument) -> String {
        format!(
            "{}?version={}&version_type=external",
            self.document_url(document.id),
            document.updated_at.timestamp_micros()
        )
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    async fn upsert(&self, document: &ProductDocument) -> Result<(), SearchError> {
        let url = self.versioned_url(document);

        let response = timeout(
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
            self.client.put(&url).json(document).send(),
        )
        .await
        .map_err(|_| SearchError::Timeout)?
        .map_err(|e| SearchError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            debug!(product_id = %document.id, index = %self.index, "Index holds a newer version");
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Rejected {
                id: document.id.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(product_id = %document.id, index = %self.index, "Document indexed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_document_url() {
        let index = HttpSearchIndex::new("http://localhost:9200/", "products");
        let id = Uuid::now_v7();

        assert_eq!(index.document_url(id), format!("http://localhost:9200/products/_doc/{}", id));
    }

    #[test]
    fn test_upsert_url_carries_external_version() {
        let index = HttpSearchIndex::new("http://localhost:9200", "products");
        let id = Uuid::now_v7();
        let updated_at = chrono::DateTime::from_timestamp(1_700_000_000, 123_456_000).unwrap();
        let document = ProductDocument {
            id,
            name: "Kettle".to_string(),
            description: String::new(),
            price: rust_decimal::Decimal::new(20, 0),
            category: "kitchen".to_string(),
            stock_quantity: 0,
            created_at: updated_at,
            updated_at,
        };

        assert_eq!(
            index.versioned_url(&document),
            format!(
                "http://localhost:9200/products/_doc/{}?version=1700000000123456&version_type=external",
                id
            )
        );
    }

    #[tokio::test]
    async fn test_unreachable_index_reports_error() {
        // Port 9 (discard) is not an HTTP server
        let index = HttpSearchIndex::new("http://127.0.0.1:9", "products");
        let document = ProductDocument {
            id: Uuid::now_v7(),
            name: "Mug".to_string(),
            description: String::new(),
            price: rust_decimal::Decimal::ONE,
            category: "kitchen".to_string(),
            stock_quantity: 1,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };

        assert!(index.upsert(&document).await.is_err());
    }
}
