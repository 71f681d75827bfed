//! Daemon lifecycle test: start workers, settle a paid order, shut down.

use std::time::Duration;

use anyhow::{anyhow, Result};
use emporium_domain::{Money, Order, ProductDetails, Quantity, SettlementOutcome};
use emporium_fulfillment::OrderItemRequest;
use emporium_store::Store;
use emporium_testkit::{customer, init_tracing};
use emporiumd::{Config, Daemon};
use rust_decimal_macros::dec;
use tokio::sync::oneshot;

#[tokio::test]
async fn test_daemon_settles_paid_orders_until_shutdown() -> Result<()> {
    init_tracing();
    let daemon = Daemon::new_memory(Config::test());
    let ledger = daemon.ledger();
    let orchestrator = daemon.orchestrator();
    let broker = daemon.broker().clone();

    let kettle = ledger
        .create_product(
            ProductDetails {
                name: "Kettle".to_string(),
                description: "Stovetop kettle".to_string(),
                price: Money::new(dec!(39.90))?,
                category: "kitchen".to_string(),
            },
            7,
        )
        .await?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(daemon.run_until(async {
        let _ = stop_rx.await;
    }));

    let order = orchestrator
        .create_order(&customer(), vec![OrderItemRequest::new(kettle.id, 3)?])
        .await?;
    orchestrator.pay_order(order.id).await?;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if ledger.get_product(kettle.id).await?.stock_quantity() == 4 {
                return Ok::<(), anyhow::Error>(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("order was not settled within 5s"))??;

    stop_tx.send(()).map_err(|_| anyhow!("daemon already stopped"))?;
    running.await??;

    assert!(broker.is_closed());
    assert_eq!(broker.backlog("order-paid")?, 0);
    assert!(orchestrator.get_order(order.id).await?.is_paid());
    Ok(())
}

#[tokio::test]
async fn test_daemon_records_compensation_for_short_stock() -> Result<()> {
    let daemon = Daemon::new_memory(Config::test());
    let ledger = daemon.ledger();
    let orchestrator = daemon.orchestrator();
    let store = daemon.store();

    let teapot = ledger
        .create_product(
            ProductDetails {
                name: "Teapot".to_string(),
                description: "Cast iron teapot".to_string(),
                price: Money::new(dec!(55))?,
                category: "kitchen".to_string(),
            },
            2,
        )
        .await?;

    // Both orders pass the creation check; only one can settle
    let first = orchestrator
        .create_order(&customer(), vec![OrderItemRequest::new(teapot.id, 2)?])
        .await?;
    let second = orchestrator
        .create_order(&customer(), vec![OrderItemRequest::new(teapot.id, 2)?])
        .await?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let broker = daemon.broker().clone();
    let running = tokio::spawn(daemon.run_until(async {
        let _ = stop_rx.await;
    }));

    orchestrator.pay_order(first.id).await?;
    orchestrator.pay_order(second.id).await?;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if broker.backlog("order-paid")? == 0 {
                return Ok::<(), anyhow::Error>(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("backlog not drained within 5s"))??;

    stop_tx.send(()).map_err(|_| anyhow!("daemon already stopped"))?;
    running.await??;

    assert_eq!(ledger.get_product(teapot.id).await?.stock_quantity(), 0);
    let outcomes = [
        store.settlements().find_outcome(first.id).await?,
        store.settlements().find_outcome(second.id).await?,
    ];
    let settled = outcomes
        .iter()
        .filter(|o| matches!(o, Some(SettlementOutcome::Settled { .. })))
        .count();
    let compensated = outcomes
        .iter()
        .filter(|o| matches!(o, Some(SettlementOutcome::Compensated(_))))
        .count();
    assert_eq!((settled, compensated), (1, 1));
    Ok(())
}

#[tokio::test]
async fn test_daemon_settles_paid_orders_that_were_never_published() -> Result<()> {
    init_tracing();
    let daemon = Daemon::new_memory(Config::test());
    let ledger = daemon.ledger();
    let store = daemon.store();

    let teapot = ledger
        .create_product(
            ProductDetails {
                name: "Teapot".to_string(),
                description: "Cast iron teapot".to_string(),
                price: Money::new(dec!(55))?,
                category: "kitchen".to_string(),
            },
            6,
        )
        .await?;

    // Persisted as PAID, but the process stopped before publishing
    let mut order = Order::new(customer().user_id);
    order.add_item(&teapot, Quantity::new(2)?)?;
    order.process_payment()?;
    store.orders().save(&order).await?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(daemon.run_until(async {
        let _ = stop_rx.await;
    }));

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if store.settlements().find_outcome(order.id).await?.is_some() {
                return Ok::<(), anyhow::Error>(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("stranded order was not settled within 5s"))??;

    stop_tx.send(()).map_err(|_| anyhow!("daemon already stopped"))?;
    running.await??;

    assert_eq!(ledger.get_product(teapot.id).await?.stock_quantity(), 4);
    Ok(())
}
