//! Product → search index propagation.
//!
//! Two modes:
//! - **direct**: upsert inline after the authoritative write, log on failure
//! - **queued**: hand the document to a background worker that retries with
//!   linear backoff
//!
//! In both modes a failure only leaves the index stale; it is never surfaced
//! to the caller.

use crate::document::ProductDocument;
use crate::index::SearchIndex;
use emporium_domain::Product;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Retry settings for the queued worker.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Base delay; retry `n` waits `n * backoff`
    pub backoff: Duration,
}

impl RetryPolicy {
    fn delay(&self, retry: u32) -> Duration {
        self.backoff * retry
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Clone)]
enum Mode {
    Direct,
    Queued(mpsc::UnboundedSender<ProductDocument>),
}

/// Propagates product state to the search index.
#[derive(Clone)]
pub struct SearchSynchronizer {
    index: Arc<dyn SearchIndex>,
    mode: Mode,
}

impl SearchSynchronizer {
    /// Upsert inline on every [`sync`](Self::sync) call.
    pub fn direct(index: Arc<dyn SearchIndex>) -> Self {
        Self { index, mode: Mode::Direct }
    }

    /// Queue documents for a background worker. The worker must be run for
    /// updates to reach the index.
    pub fn queued(index: Arc<dyn SearchIndex>, policy: RetryPolicy) -> (Self, SearchSyncWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let synchronizer = Self {
            index: Arc::clone(&index),
            mode: Mode::Queued(sender),
        };
        let worker = SearchSyncWorker { index, policy, receiver };
        (synchronizer, worker)
    }

    /// Propagate the current state of `product`.
    pub async fn sync(&self, product: &Product) {
        let document = ProductDocument::from(product);

        match &self.mode {
            Mode::Direct => match self.index.upsert(&document).await {
                Ok(()) => debug!(product_id = %document.id, "Search index synced"),
                Err(e) => error!(
                    product_id = %document.id,
                    error = %e,
                    "Search index sync failed; index is stale"
                ),
            },
            Mode::Queued(sender) => {
                let product_id = document.id;
                if sender.send(document).is_err() {
                    warn!(%product_id, "Search sync worker stopped; update dropped");
                }
            },
        }
    }
}

/// Background worker draining the queued synchronizer.
pub struct SearchSyncWorker {
    index: Arc<dyn SearchIndex>,
    policy: RetryPolicy,
    receiver: mpsc::UnboundedReceiver<ProductDocument>,
}

impl SearchSyncWorker {
    /// Run until shutdown is signaled or every synchronizer is dropped.
    ///
    /// Documents still queued at shutdown get a single attempt.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            max_retries = self.policy.max_retries,
            backoff_ms = self.policy.backoff.as_millis() as u64,
            "Search sync worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Search sync worker shutdown requested");
                    break;
                }
                next = self.receiver.recv() => match next {
                    Some(document) => self.deliver(&document, &shutdown).await,
                    None => break,
                }
            }
        }

        self.receiver.close();
        while let Ok(document) = self.receiver.try_recv() {
            if let Err(e) = self.index.upsert(&document).await {
                error!(product_id = %document.id, error = %e, "Search index sync failed during shutdown");
            }
        }

        info!("Search sync worker stopped");
    }

    async fn deliver(&self, document: &ProductDocument, shutdown: &CancellationToken) {
        let mut retry = 0;
        loop {
            match self.index.upsert(document).await {
                Ok(()) => {
                    debug!(product_id = %document.id, retry, "Search index synced");
                    return;
                },
                Err(e) if retry < self.policy.max_retries => {
                    retry += 1;
                    warn!(
                        product_id = %document.id,
                        retry,
                        error = %e,
                        "Search index sync failed (will retry)"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            error!(product_id = %document.id, "Search index sync abandoned at shutdown");
                            return;
                        }
                        _ = tokio::time::sleep(self.policy.delay(retry)) => {}
                    }
                },
                Err(e) => {
                    error!(
                        product_id = %document.id,
                        attempts = retry + 1,
                        error = %e,
                        "Search index sync failed; giving up"
                    );
                    return;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SearchError;
    use crate::index::MemorySearchIndex;
    use async_trait::async_trait;
    use emporium_domain::{Money, ProductDetails};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` upserts, then forwards to a memory index.
    struct FlakyIndex {
        failures: u32,
        calls: AtomicU32,
        inner: MemorySearchIndex,
    }

    impl FlakyIndex {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                inner: MemorySearchIndex::new(),
            }
        }
    }

    #[async_trait]
    impl SearchIndex for FlakyIndex {
        async fn upsert(&self, document: &ProductDocument) -> Result<(), SearchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(SearchError::Unavailable("index down".to_string()));
            }
            self.inner.upsert(document).await
        }
    }

    fn product() -> Product {
        Product::new(
            ProductDetails {
                name: "Tea Tin".to_string(),
                description: String::new(),
                price: Money::new(dec!(9.99)).unwrap(),
                category: "pantry".to_string(),
            },
            7,
        )
        .unwrap()
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_direct_sync_writes_document() {
        let index = Arc::new(MemorySearchIndex::new());
        let synchronizer = SearchSynchronizer::direct(index.clone());
        let product = product();

        synchronizer.sync(&product).await;

        assert_eq!(index.get(product.id).unwrap().stock_quantity, 7);
    }

    #[tokio::test]
    async fn test_direct_sync_swallows_failure() {
        let index = Arc::new(FlakyIndex::new(u32::MAX));
        let synchronizer = SearchSynchronizer::direct(index.clone());

        synchronizer.sync(&product()).await;

        assert_eq!(index.calls.load(Ordering::SeqCst), 1);
        assert!(index.inner.is_empty());
    }

    #[tokio::test]
    async fn test_queued_sync_retries_until_success() {
        let index = Arc::new(FlakyIndex::new(2));
        let (synchronizer, worker) = SearchSynchronizer::queued(index.clone(), fast_policy(3));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        let product = product();
        synchronizer.sync(&product).await;

        tokio::time::timeout(Duration::from_secs(2), async {
            while index.inner.get(product.id).is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(index.calls.load(Ordering::SeqCst), 3);
        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_queued_sync_gives_up_after_max_retries() {
        let index = Arc::new(FlakyIndex::new(u32::MAX));
        let (synchronizer, worker) = SearchSynchronizer::queued(index.clone(), fast_policy(2));

        synchronizer.sync(&product()).await;
        // Dropping the last synchronizer ends the worker once the queue is drained
        drop(synchronizer);
        worker.run(CancellationToken::new()).await;

        assert_eq!(index.calls.load(Ordering::SeqCst), 3);
        assert!(index.inner.is_empty());
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(300));
    }
}
