//! Fault-injecting adapters.

use async_trait::async_trait;
use emporium_channel::{ChannelError, EventChannel, MemoryBroker, Subscription};
use emporium_domain::{Order, OrderId, OrderStatus, Product, SettlementOutcome, UserId};
use emporium_search::{MemorySearchIndex, ProductDocument, SearchError, SearchIndex};
use emporium_store::{
    LineSettlement, MemoryStore, OrderRepository, ProductRepository, SettlementLine, SettlementRepository,
    Store, StoreError,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Search
// =============================================================================

/// Search index that rejects every upsert.
#[derive(Default)]
pub struct FailingSearchIndex {
    calls: AtomicU32,
}

impl FailingSearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts attempted so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchIndex for FailingSearchIndex {
    async fn upsert(&self, _document: &ProductDocument) -> Result<(), SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SearchError::Unavailable("search cluster unreachable".to_string()))
    }
}

/// Memory index whose upserts of matching documents are held back, so a
/// later write can overtake them.
pub struct DelayedSearchIndex {
    inner: Arc<MemorySearchIndex>,
    delay: Duration,
    hold: Box<dyn Fn(&ProductDocument) -> bool + Send + Sync>,
}

impl DelayedSearchIndex {
    /// Delay upserts of documents for which `hold` returns true.
    pub fn new(
        inner: Arc<MemorySearchIndex>,
        delay: Duration,
        hold: impl Fn(&ProductDocument) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner,
            delay,
            hold: Box::new(hold),
        }
    }
}

#[async_trait]
impl SearchIndex for DelayedSearchIndex {
    async fn upsert(&self, document: &ProductDocument) -> Result<(), SearchError> {
        if (self.hold)(document) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.upsert(document).await
    }
}

// =============================================================================
// Channel
// =============================================================================

/// Broker wrapper whose publishes can be switched to fail.
pub struct FailingChannel {
    inner: MemoryBroker,
    failing: AtomicBool,
}

impl FailingChannel {
    /// Wrap `inner`; publishes fail until [`set_failing(false)`](Self::set_failing).
    pub fn new(inner: MemoryBroker) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(true),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventChannel for FailingChannel {
    async fn publish(&self, topic: &str, key: &str, payload: serde_json::Value) -> Result<u64, ChannelError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable("broker unreachable".to_string()));
        }
        self.inner.publish(topic, key, payload).await
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, ChannelError> {
        self.inner.subscribe(topic).await
    }
}

// =============================================================================
// Store
// =============================================================================

/// Memory store whose first `failures` settlement calls fail with a
/// connection error.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    remaining: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, failures: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(failures),
        }
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    fn trip(&self) -> Result<(), StoreError> {
        let tripped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(StoreError::Connection("connection reset by peer".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SettlementRepository for FlakyStore {
    async fn settle_line(&self, line: &SettlementLine) -> Result<LineSettlement, StoreError> {
        self.trip()?;
        self.inner.settle_line(line).await
    }

    async fn release_line(&self, line: &SettlementLine) -> Result<Product, StoreError> {
        self.inner.release_line(line).await
    }

    async fn record_outcome(&self, order_id: OrderId, outcome: &SettlementOutcome) -> Result<(), StoreError> {
        self.inner.record_outcome(order_id, outcome).await
    }

    async fn find_outcome(&self, order_id: OrderId) -> Result<Option<SettlementOutcome>, StoreError> {
        self.inner.find_outcome(order_id).await
    }
}

impl Store for FlakyStore {
    fn products(&self) -> &dyn ProductRepository {
        self.inner.as_ref()
    }

    fn orders(&self) -> &dyn OrderRepository {
        self.inner.as_ref()
    }

    fn settlements(&self) -> &dyn SettlementRepository {
        self
    }
}

/// Memory store whose order lookups by id take `delay`, widening the window
/// between reading an order and changing it.
pub struct SlowOrderStore {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

impl SlowOrderStore {
    pub fn new(inner: Arc<MemoryStore>, delay: Duration) -> Self {
        Self { inner, delay }
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }
}

#[async_trait]
impl OrderRepository for SlowOrderStore {
    async fn save(&self, order: &Order) -> Result<(), StoreError> {
        OrderRepository::save(self.inner.as_ref(), order).await
    }

    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        tokio::time::sleep(self.delay).await;
        OrderRepository::find_by_id(self.inner.as_ref(), id).await
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, StoreError> {
        self.inner.find_by_user(user_id).await
    }

    async fn find_by_user_and_status(&self, user_id: UserId, status: OrderStatus) -> Result<Vec<Order>, StoreError> {
        self.inner.find_by_user_and_status(user_id, status).await
    }

    async fn transition_status(&self, id: OrderId, from: OrderStatus, to: OrderStatus) -> Result<bool, StoreError> {
        self.inner.transition_status(id, from, to).await
    }

    async fn find_paid_unsettled(&self) -> Result<Vec<Order>, StoreError> {
        self.inner.find_paid_unsettled().await
    }
}

impl Store for SlowOrderStore {
    fn products(&self) -> &dyn ProductRepository {
        self.inner.as_ref()
    }

    fn orders(&self) -> &dyn OrderRepository {
        self
    }

    fn settlements(&self) -> &dyn SettlementRepository {
        self.inner.as_ref()
    }
}
