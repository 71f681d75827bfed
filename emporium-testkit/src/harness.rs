//! In-memory pipeline harness.

use anyhow::{anyhow, Result};
use emporium_channel::{BrokerConfig, EventChannel, MemoryBroker, OrderEventProducer, Subscription};
use emporium_domain::{CallerContext, Money, Order, Product, ProductDetails, ProductId};
use emporium_fulfillment::{
    FulfillmentResult, InventoryLedger, OrderItemRequest, OrderOrchestrator, ReconcilerWorker,
    SettlementPolicy, StockReconciler,
};
use emporium_search::{MemorySearchIndex, SearchIndex, SearchSynchronizer};
use emporium_store::{MemoryStore, Store};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Topic used by every harness.
pub const ORDER_PAID_TOPIC: &str = "order-paid";

/// Builder for [`Harness`].
pub struct HarnessBuilder {
    policy: SettlementPolicy,
    broker: Option<MemoryBroker>,
    channel: Option<Arc<dyn EventChannel>>,
    search: Option<Arc<dyn SearchIndex>>,
}

impl HarnessBuilder {
    pub fn policy(mut self, policy: SettlementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Broker used for subscriptions (and publishing, unless `channel` is set).
    pub fn broker(mut self, broker: MemoryBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Channel the orchestrator publishes through.
    pub fn channel(mut self, channel: Arc<dyn EventChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Index the synchronizer writes to, instead of the harness memory index.
    pub fn search(mut self, search: Arc<dyn SearchIndex>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn build(self) -> Harness<MemoryStore> {
        self.build_with_store(Arc::new(MemoryStore::new()))
    }

    pub fn build_with_store<S: Store + ?Sized>(self, store: Arc<S>) -> Harness<S> {
        let broker = self.broker.unwrap_or_else(|| {
            MemoryBroker::new(BrokerConfig {
                ack_timeout: Duration::from_millis(500),
                ..BrokerConfig::default()
            })
        });
        let channel = self
            .channel
            .unwrap_or_else(|| Arc::new(broker.clone()) as Arc<dyn EventChannel>);

        let index = Arc::new(MemorySearchIndex::new());
        let search_target = self
            .search
            .unwrap_or_else(|| index.clone() as Arc<dyn SearchIndex>);
        let search = SearchSynchronizer::direct(search_target);

        let ledger = Arc::new(InventoryLedger::new(store.clone(), search, self.policy));
        let producer = OrderEventProducer::new(channel, ORDER_PAID_TOPIC);
        let orchestrator = OrderOrchestrator::new(store.clone(), producer);
        let reconciler = Arc::new(StockReconciler::new(store.clone(), ledger.clone()));

        Harness {
            store,
            broker,
            index,
            ledger,
            orchestrator,
            reconciler,
        }
    }
}

/// Fully wired in-memory pipeline.
pub struct Harness<S: Store + ?Sized = MemoryStore> {
    pub store: Arc<S>,
    pub broker: MemoryBroker,
    pub index: Arc<MemorySearchIndex>,
    pub ledger: Arc<InventoryLedger<S>>,
    pub orchestrator: OrderOrchestrator<S>,
    pub reconciler: Arc<StockReconciler<S>>,
}

impl Harness<MemoryStore> {
    /// Best-effort settlement, direct search sync, 500ms ack timeout.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            policy: SettlementPolicy::default(),
            broker: None,
            channel: None,
            search: None,
        }
    }
}

impl Default for Harness<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store + ?Sized + 'static> Harness<S> {
    /// Create a product through the ledger.
    pub async fn seed_product(&self, name: &str, price: Decimal, stock: u32) -> Result<Product> {
        let details = ProductDetails {
            name: name.to_string(),
            description: format!("{} (test fixture)", name),
            price: Money::new(price)?,
            category: "fixtures".to_string(),
        };
        Ok(self.ledger.create_product(details, stock).await?)
    }

    /// Current authoritative stock.
    pub async fn stock_of(&self, id: ProductId) -> Result<u32> {
        let product = self
            .store
            .products()
            .find_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("product {} not found", id))?;
        Ok(product.stock_quantity())
    }

    /// Create an order for `(product, quantity)` lines.
    pub async fn place_order(&self, caller: &CallerContext, lines: &[(&Product, u32)]) -> FulfillmentResult<Order> {
        let requests = lines
            .iter()
            .map(|(product, quantity)| OrderItemRequest::new(product.id, *quantity))
            .collect::<FulfillmentResult<Vec<_>>>()?;
        self.orchestrator.create_order(caller, requests).await
    }

    pub async fn subscribe(&self) -> Result<Subscription> {
        Ok(self.broker.subscribe(ORDER_PAID_TOPIC).await?)
    }

    pub fn worker(&self, name: &str) -> ReconcilerWorker<S> {
        ReconcilerWorker::new(name, self.reconciler.clone())
    }

    /// Receive one delivery and process it with a worker.
    pub async fn settle_next(&self, subscription: &Subscription) -> Result<()> {
        let delivery = tokio::time::timeout(Duration::from_secs(2), subscription.next())
            .await
            .map_err(|_| anyhow!("no delivery within 2s"))?
            .ok_or_else(|| anyhow!("subscription closed"))?;
        self.worker("inline").process(delivery).await;
        Ok(())
    }

    /// Spawn `count` workers sharing one subscription.
    pub async fn spawn_workers(&self, count: usize) -> Result<WorkerPool> {
        let subscription = self.subscribe().await?;
        let shutdown = CancellationToken::new();
        let handles = (0..count)
            .map(|i| {
                let worker = self.worker(&format!("worker-{}", i));
                tokio::spawn(worker.run(subscription.clone(), shutdown.clone()))
            })
            .collect();
        Ok(WorkerPool { shutdown, handles })
    }

    /// Wait until every published message is acknowledged.
    pub async fn drain(&self, within: Duration) -> Result<()> {
        tokio::time::timeout(within, async {
            loop {
                if self.broker.backlog(ORDER_PAID_TOPIC)? == 0 {
                    return Ok::<(), anyhow::Error>(());
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .map_err(|_| anyhow!("backlog not drained within {:?}", within))?
    }
}

/// Running reconciler workers.
pub struct WorkerPool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Signal shutdown and wait for every worker.
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        for handle in self.handles {
            handle.await?;
        }
        Ok(())
    }
}
