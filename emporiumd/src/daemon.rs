//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Store (memory, or PostgreSQL with the `postgres` feature)
//! - Event channel (partitioned in-memory broker)
//! - Search synchronizer (queued, with its own worker)
//! - Inventory ledger, order orchestrator, stock reconciler
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Start the search sync worker and the reconciler workers
//! 4. Wait for the shutdown signal
//! 5. Cancel workers, close the broker, join tasks

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use emporium_channel::{BrokerConfig, EventChannel, MemoryBroker, OrderEventProducer};
use emporium_fulfillment::{InventoryLedger, OrderOrchestrator, ReconcilerWorker, StockReconciler};
use emporium_search::{
    HttpSearchIndex, MemorySearchIndex, RetryPolicy, SearchIndex, SearchSyncWorker, SearchSynchronizer,
};
use emporium_store::{MemoryStore, Store};

use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Daemon
// =============================================================================

/// The main Emporium daemon.
pub struct Daemon {
    /// Configuration
    config: Config,
    /// Persistence
    store: Arc<dyn Store>,
    /// Event channel
    broker: MemoryBroker,
    /// Inventory ledger
    ledger: Arc<InventoryLedger<dyn Store>>,
    /// Order orchestrator
    orchestrator: Arc<OrderOrchestrator<dyn Store>>,
    /// Stock reconciler
    reconciler: Arc<StockReconciler<dyn Store>>,
    /// Search sync worker, taken when the daemon runs
    search_worker: Option<SearchSyncWorker>,
}

impl Daemon {
    /// Create a daemon backed by the in-memory store.
    pub fn new_memory(config: Config) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Create a daemon backed by PostgreSQL, running migrations first.
    #[cfg(feature = "postgres")]
    pub async fn connect_postgres(config: Config) -> DaemonResult<Self> {
        let url = config
            .database
            .url
            .clone()
            .ok_or_else(|| DaemonError::Config("EMPORIUM_DATABASE_URL is required".to_string()))?;

        let store = emporium_store::PgStore::connect(&url, config.database.max_connections).await?;
        store.migrate().await?;
        info!(max_connections = config.database.max_connections, "Connected to PostgreSQL");

        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Create a daemon around an existing store.
    pub fn with_store(config: Config, store: Arc<dyn Store>) -> Self {
        let broker = MemoryBroker::new(BrokerConfig {
            partitions: config.channel.partitions,
            ack_timeout: config.channel.ack_timeout,
            ..BrokerConfig::default()
        });

        let index: Arc<dyn SearchIndex> = match &config.search.url {
            Some(url) => Arc::new(HttpSearchIndex::new(url.clone(), config.search.index.clone())),
            None => Arc::new(MemorySearchIndex::new()),
        };
        let (search, search_worker) = SearchSynchronizer::queued(
            index,
            RetryPolicy {
                max_retries: config.search.max_retries,
                backoff: config.search.backoff,
            },
        );

        let ledger = Arc::new(InventoryLedger::new(store.clone(), search, config.settlement_policy));
        let producer = OrderEventProducer::new(
            Arc::new(broker.clone()) as Arc<dyn EventChannel>,
            config.channel.order_paid_topic.clone(),
        );
        let orchestrator = Arc::new(OrderOrchestrator::new(store.clone(), producer));
        let reconciler = Arc::new(StockReconciler::new(store.clone(), ledger.clone()));

        Self {
            config,
            store,
            broker,
            ledger,
            orchestrator,
            reconciler,
            search_worker: Some(search_worker),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Caller-facing order operations.
    pub fn orchestrator(&self) -> Arc<OrderOrchestrator<dyn Store>> {
        self.orchestrator.clone()
    }

    /// Product and stock operations.
    pub fn ledger(&self) -> Arc<InventoryLedger<dyn Store>> {
        self.ledger.clone()
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT).
    pub async fn run(self) -> DaemonResult<()> {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
            }
        })
        .await
    }

    /// Run until `signal` completes, then shut down gracefully.
    pub async fn run_until<F>(mut self, signal: F) -> DaemonResult<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            policy = %self.config.settlement_policy,
            "Starting Emporium daemon"
        );

        let shutdown = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        // 1. Search sync worker
        if let Some(worker) = self.search_worker.take() {
            tasks.push(tokio::spawn(worker.run(shutdown.clone())));
        }

        // 2. Reconciler workers share one subscription
        let topic = &self.config.channel.order_paid_topic;
        let subscription = self.broker.subscribe(topic).await?;
        for i in 0..self.config.channel.consumer_workers {
            let worker = ReconcilerWorker::new(format!("reconciler-{}", i), self.reconciler.clone());
            tasks.push(tokio::spawn(worker.run(subscription.clone(), shutdown.clone())));
        }
        info!(
            workers = self.config.channel.consumer_workers,
            topic = %topic,
            partitions = self.config.channel.partitions,
            "Consumers running"
        );

        // 3. Paid orders whose event may never have reached the broker
        match self.orchestrator.republish_unsettled().await {
            Ok(count) => info!(republished = count, "Startup redrive complete"),
            Err(e) => error!(error = %e, "Startup redrive failed"),
        }

        // 4. Wait for shutdown
        signal.await;

        // 5. Graceful shutdown
        self.shutdown(shutdown, tasks).await
    }

    async fn shutdown(&self, shutdown: CancellationToken, tasks: Vec<JoinHandle<()>>) -> DaemonResult<()> {
        info!("Initiating graceful shutdown");

        shutdown.cancel();
        self.broker.close();

        let mut failed = 0usize;
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task failed");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(DaemonError::Task(format!("{} background task(s) failed", failed)));
        }

        info!("Shutdown complete");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
