//! Daemon configuration.
//!
//! Loads configuration from `EMPORIUM_*` environment variables with sensible
//! defaults. A `.env` file is read first when present.

use crate::error::{DaemonError, DaemonResult};
use emporium_fulfillment::SettlementPolicy;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Environment (test, development, production)
    pub environment: Environment,

    /// Event channel and consumer configuration
    pub channel: ChannelConfig,

    /// What happens to already settled lines when a later line is short
    pub settlement_policy: SettlementPolicy,

    /// Search index configuration
    pub search: SearchConfig,

    /// Database configuration (used with the `postgres` feature)
    pub database: DatabaseConfig,

    /// Log output format
    pub log_format: LogFormat,
}

/// Event channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Topic carrying order-paid events
    pub order_paid_topic: String,
    /// Partitions per topic
    pub partitions: usize,
    /// Redelivery timeout for unacknowledged messages
    pub ack_timeout: Duration,
    /// Reconciler workers sharing the subscription
    pub consumer_workers: usize,
}

/// Search index configuration.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Base URL of an Elasticsearch-compatible index; in-memory index when absent
    pub url: Option<String>,
    /// Index name
    pub index: String,
    /// Retries after a failed upsert
    pub max_retries: u32,
    /// Linear backoff step between retries
    pub backoff: Duration,
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: Option<String>,
    /// Pool size
    pub max_connections: u32,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable
    Pretty,
    /// One JSON object per line
    Json,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> DaemonResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let vars = Vars { lookup };

        let environment = vars.parse_with("EMPORIUM_ENV", defaults.environment, Environment::parse)?;

        let partitions = vars.parse("EMPORIUM_CHANNEL_PARTITIONS", defaults.channel.partitions)?;
        if partitions == 0 {
            return Err(DaemonError::Config("EMPORIUM_CHANNEL_PARTITIONS must be > 0".to_string()));
        }
        let consumer_workers = vars.parse("EMPORIUM_CONSUMER_WORKERS", defaults.channel.consumer_workers)?;
        if consumer_workers == 0 {
            return Err(DaemonError::Config("EMPORIUM_CONSUMER_WORKERS must be > 0".to_string()));
        }
        let channel = ChannelConfig {
            order_paid_topic: vars.string("EMPORIUM_ORDER_PAID_TOPIC", &defaults.channel.order_paid_topic),
            partitions,
            ack_timeout: Duration::from_millis(
                vars.parse("EMPORIUM_ACK_TIMEOUT_MS", defaults.channel.ack_timeout.as_millis() as u64)?,
            ),
            consumer_workers,
        };

        let settlement_policy = vars.parse_with(
            "EMPORIUM_SETTLEMENT_POLICY",
            defaults.settlement_policy,
            |value| SettlementPolicy::from_str(value).ok(),
        )?;

        let search = SearchConfig {
            url: vars.optional("EMPORIUM_SEARCH_URL"),
            index: vars.string("EMPORIUM_SEARCH_INDEX", &defaults.search.index),
            max_retries: vars.parse("EMPORIUM_SEARCH_MAX_RETRIES", defaults.search.max_retries)?,
            backoff: Duration::from_millis(
                vars.parse("EMPORIUM_SEARCH_BACKOFF_MS", defaults.search.backoff.as_millis() as u64)?,
            ),
        };

        let database = DatabaseConfig {
            url: vars.optional("EMPORIUM_DATABASE_URL"),
            max_connections: vars.parse("EMPORIUM_DATABASE_MAX_CONNECTIONS", defaults.database.max_connections)?,
        };

        let log_format = vars.parse_with("EMPORIUM_LOG_FORMAT", defaults.log_format, LogFormat::parse)?;

        Ok(Self {
            environment,
            channel,
            settlement_policy,
            search,
            database,
            log_format,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            environment: Environment::Test,
            channel: ChannelConfig {
                order_paid_topic: "order-paid".to_string(),
                partitions: 4,
                ack_timeout: Duration::from_millis(500),
                consumer_workers: 2,
            },
            settlement_policy: SettlementPolicy::BestEffort,
            search: SearchConfig {
                url: None,
                index: "products".to_string(),
                max_retries: 1,
                backoff: Duration::from_millis(10),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
            },
            log_format: LogFormat::Pretty,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            channel: ChannelConfig {
                order_paid_topic: "order-paid".to_string(),
                partitions: 8,
                ack_timeout: Duration::from_secs(30),
                consumer_workers: 2,
            },
            settlement_policy: SettlementPolicy::BestEffort,
            search: SearchConfig {
                url: None,
                index: "products".to_string(),
                max_retries: 3,
                backoff: Duration::from_millis(200),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
            },
            log_format: LogFormat::Pretty,
        }
    }
}

/// Typed access to a variable source.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> DaemonResult<T> {
        self.parse_with(key, default, |value| value.parse().ok())
    }

    fn parse_with<T>(&self, key: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> DaemonResult<T> {
        match self.optional(key) {
            Some(value) => {
                parse(&value).ok_or_else(|| DaemonError::Config(format!("Invalid {} value: {}", key, value)))
            },
            None => Ok(default),
        }
    }
}

impl Environment {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "test" => Some(Environment::Test),
            "development" | "dev" => Some(Environment::Development),
            "production" | "prod" => Some(Environment::Production),
            _ => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "pretty" | "text" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
