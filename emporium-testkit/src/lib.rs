//! Test helpers for Emporium pipeline tests.
//!
//! Provides an in-memory [`Harness`] wiring store, broker, search index and
//! fulfillment services, plus fault-injecting adapters.

mod faults;
mod harness;

pub use faults::{DelayedSearchIndex, FailingChannel, FailingSearchIndex, FlakyStore, SlowOrderStore};
pub use harness::{Harness, HarnessBuilder, WorkerPool, ORDER_PAID_TOPIC};

use emporium_domain::CallerContext;
use uuid::Uuid;

/// A fresh customer identity.
pub fn customer() -> CallerContext {
    CallerContext::new(Uuid::now_v7())
}

/// Install a test-friendly tracing subscriber. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
