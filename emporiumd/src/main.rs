//! Emporium Daemon
//!
//! Runs the stock reconciliation consumers and search synchronization.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p emporiumd
//!
//! # PostgreSQL-backed, JSON logs
//! EMPORIUM_DATABASE_URL=postgres://... EMPORIUM_LOG_FORMAT=json \
//!     cargo run -p emporiumd --features postgres
//! ```
//!
//! # Environment Variables
//!
//! - `EMPORIUM_ENV`: Environment (test, development, production)
//! - `EMPORIUM_ORDER_PAID_TOPIC`: Order paid topic (default: order-paid)
//! - `EMPORIUM_CHANNEL_PARTITIONS`: Partitions per topic (default: 8)
//! - `EMPORIUM_ACK_TIMEOUT_MS`: Redelivery timeout (default: 30000)
//! - `EMPORIUM_CONSUMER_WORKERS`: Reconciler workers (default: 2)
//! - `EMPORIUM_SETTLEMENT_POLICY`: best-effort | all-or-nothing (default: best-effort)
//! - `EMPORIUM_SEARCH_URL`: Search index base URL (default: in-memory index)
//! - `EMPORIUM_SEARCH_INDEX`: Index name (default: products)
//! - `EMPORIUM_SEARCH_MAX_RETRIES`: Upsert retries (default: 3)
//! - `EMPORIUM_SEARCH_BACKOFF_MS`: Retry backoff step (default: 200)
//! - `EMPORIUM_DATABASE_URL`: PostgreSQL URL (`postgres` feature)
//! - `EMPORIUM_LOG_FORMAT`: pretty | json (default: pretty)

use emporiumd::{Config, Daemon, LogFormat};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive("emporiumd=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        topic = %config.channel.order_paid_topic,
        workers = config.channel.consumer_workers,
        search = config.search.url.as_deref().unwrap_or("memory"),
        "Emporium Daemon"
    );

    // Create and run daemon
    #[cfg(feature = "postgres")]
    let daemon = if config.database.url.is_some() {
        Daemon::connect_postgres(config).await?
    } else {
        Daemon::new_memory(config)
    };
    #[cfg(not(feature = "postgres"))]
    let daemon = Daemon::new_memory(config);

    daemon.run().await?;

    Ok(())
}
