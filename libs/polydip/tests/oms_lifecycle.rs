//! Order manager lifecycle scenarios driven through a mock venue.

mod common;

use common::MockVenue;
use polydip::domain::{OrderKind, OrderStatus, Side};
use polydip::oms::{
    OrderEvent, OrderManager, OrderManagerSettings, OutcomeStatus, WatchMode,
};
use polydip::venue::{LimitOrderParams, MarketOrderParams};
use polydip::wire::UserOrderMsg;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn limit(price: f64, size: f64) -> LimitOrderParams {
    LimitOrderParams {
        token_id: "token-up".to_string(),
        side: Side::Buy,
        price,
        size,
        kind: OrderKind::GTC,
        expiration: None,
    }
}

fn market(amount: f64, kind: OrderKind) -> MarketOrderParams {
    MarketOrderParams {
        token_id: "token-up".to_string(),
        side: Side::Buy,
        amount,
        kind,
    }
}

/// Polling-mode manager with a long interval so tests drive polls by hand.
fn manager(venue: Arc<MockVenue>) -> OrderManager {
    let m = OrderManager::new(
        venue,
        OrderManagerSettings {
            mode: WatchMode::Polling,
            polling_interval: Duration::from_secs(600),
            polygon_rpc_url: None,
            chain_id: 137,
        },
    );
    m.start().unwrap();
    m
}

fn drain(rx: &mut broadcast::Receiver<OrderEvent>) -> Vec<OrderEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn names(events: &[OrderEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

#[tokio::test]
async fn gtc_partial_fill_via_polling() {
    let venue = MockVenue::new();
    let manager = manager(Arc::clone(&venue));
    let mut rx = manager.events();

    let handle = manager.create_order(limit(0.5, 100.0), None).await.unwrap();
    let order_id = handle.order_id().expect("order id assigned");

    // Initial poll: OPEN, nothing filled
    manager.poll_now(&order_id).await.unwrap();
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| e.name() == "order_opened"));

    // Venue reports a 50-share fill
    venue.update(&order_id, |o| {
        o.size_matched = 50.0;
        o.remaining_size = 50.0;
        o.status = OrderStatus::PartiallyFilled;
    });
    manager.poll_now(&order_id).await.unwrap();

    // Unchanged polls emit nothing further
    manager.poll_now(&order_id).await.unwrap();
    manager.poll_now(&order_id).await.unwrap();

    let events = drain(&mut rx);
    let partials: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            OrderEvent::PartiallyFilled { fill, .. } => Some(fill),
            _ => None,
        })
        .collect();
    assert_eq!(partials.len(), 1, "exactly one partial fill, got {:?}", names(&events));
    assert!((partials[0].size - 50.0).abs() < 1e-9);
    assert!((partials[0].cumulative_filled - 50.0).abs() < 1e-9);
    assert!(!partials[0].is_complete_fill);

    let record = manager.get_watched(&order_id).unwrap();
    assert!((record.filled_size + record.remaining_size - 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn fok_market_order_instant_complete() {
    let venue = MockVenue::new();
    venue.auto_fill_market.store(true, Ordering::Relaxed);
    *venue.fill_price.lock() = 0.5;
    let manager = manager(Arc::clone(&venue));
    let mut rx = manager.events();

    let handle = manager
        .create_market_order(market(10.0, OrderKind::FOK), None)
        .await
        .unwrap();
    let order_id = handle.order_id().expect("order id assigned");

    manager.poll_now(&order_id).await.unwrap();

    let events = drain(&mut rx);
    let event_names = names(&events);
    assert!(
        !event_names.contains(&"order_opened"),
        "FOK must not pass through OPEN, got {:?}",
        event_names
    );
    match events
        .iter()
        .find(|e| e.name() == "order_filled")
        .expect("order_filled emitted")
    {
        OrderEvent::Filled { fill, .. } => {
            assert!(fill.as_ref().expect("completing fill").is_complete_fill);
        }
        _ => unreachable!(),
    }

    let outcome = handle.wait().await;
    assert_eq!(outcome.status, OutcomeStatus::Filled);

    // Terminal orders leave the watched set immediately
    assert_eq!(manager.watched_count(), 0);
}

#[tokio::test]
async fn fak_partial_fill_then_residual_cancel() {
    let venue = MockVenue::new();
    let manager = manager(Arc::clone(&venue));
    let mut rx = manager.events();

    let handle = manager
        .create_market_order(market(100.0, OrderKind::FAK), None)
        .await
        .unwrap();
    let order_id = handle.order_id().unwrap();

    venue.update(&order_id, |o| {
        o.size_matched = 60.0;
        o.remaining_size = 40.0;
        o.status = OrderStatus::PartiallyFilled;
    });
    manager.poll_now(&order_id).await.unwrap();

    venue.update(&order_id, |o| {
        o.status = OrderStatus::Cancelled;
    });
    manager.poll_now(&order_id).await.unwrap();

    let events = drain(&mut rx);
    let partials = events
        .iter()
        .filter(|e| e.name() == "order_partially_filled")
        .count();
    assert_eq!(partials, 1);

    let cancels: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            OrderEvent::Cancelled {
                order,
                cancelled_size,
                ..
            } => Some((order.filled_size, *cancelled_size)),
            _ => None,
        })
        .collect();
    assert_eq!(cancels.len(), 1);
    assert!((cancels[0].0 - 60.0).abs() < 1e-9);
    assert!((cancels[0].1 - 40.0).abs() < 1e-9);

    let outcome = handle.wait().await;
    assert_eq!(outcome.status, OutcomeStatus::Cancelled);
    assert_eq!(manager.watched_count(), 0);
}

#[tokio::test]
async fn ws_replay_after_polling_fill_is_silent() {
    let venue = MockVenue::new();
    let manager = manager(Arc::clone(&venue));
    let mut rx = manager.events();

    let handle = manager.create_order(limit(0.5, 100.0), None).await.unwrap();
    let order_id = handle.order_id().unwrap();

    // Socket is down; polling alone advances the order to FILLED
    manager.poll_now(&order_id).await.unwrap();
    venue.update(&order_id, |o| {
        o.size_matched = 50.0;
        o.remaining_size = 50.0;
        o.status = OrderStatus::PartiallyFilled;
    });
    manager.poll_now(&order_id).await.unwrap();
    venue.update(&order_id, |o| {
        o.size_matched = 100.0;
        o.remaining_size = 0.0;
        o.status = OrderStatus::Filled;
    });
    manager.poll_now(&order_id).await.unwrap();
    drain(&mut rx);

    // Reconnect replays the last UPDATE with size_matched == filled_size
    let replay = UserOrderMsg {
        id: order_id.clone(),
        asset_id: "token-up".to_string(),
        market: "0xabc".to_string(),
        side: "BUY".to_string(),
        price: "0.5".to_string(),
        original_size: "100".to_string(),
        size_matched: "100".to_string(),
        associate_trades: vec![],
        outcome: String::new(),
        owner: String::new(),
        expiration: None,
        order_type: None,
        status: None,
        msg_type: "UPDATE".to_string(),
        timestamp: None,
    };
    manager.ingest_user_order(&replay, 1_700_000_000_000);

    let events = drain(&mut rx);
    assert!(
        events.is_empty(),
        "replayed update must be deduplicated, got {:?}",
        names(&events)
    );
}

#[tokio::test]
async fn validation_failures_never_reach_the_venue() {
    let venue = MockVenue::new();
    let manager = manager(Arc::clone(&venue));
    let mut rx = manager.events();

    // Off-tick price
    let handle = manager.create_order(limit(0.011, 100.0), None).await.unwrap();
    let outcome = handle.wait().await;
    assert_eq!(outcome.status, OutcomeStatus::Rejected);

    // Minimum shares
    let handle = manager.create_order(limit(0.5, 4.0), None).await.unwrap();
    assert_eq!(handle.wait().await.status, OutcomeStatus::Rejected);

    // Minimum notional: 5 x 0.19 = $0.95
    let handle = manager.create_order(limit(0.19, 5.0), None).await.unwrap();
    assert_eq!(handle.wait().await.status, OutcomeStatus::Rejected);

    // Market order below $1
    let handle = manager
        .create_market_order(market(0.99, OrderKind::FOK), None)
        .await
        .unwrap();
    assert_eq!(handle.wait().await.status, OutcomeStatus::Rejected);

    assert_eq!(venue.submission_count(), 0);
    let events = drain(&mut rx);
    assert_eq!(
        events.iter().filter(|e| e.name() == "order_rejected").count(),
        4
    );
}

#[tokio::test]
async fn rejected_callbacks_fire_retroactively_and_panics_are_swallowed() {
    let venue = MockVenue::new();
    let manager = manager(Arc::clone(&venue));

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);

    let handle = manager.create_order(limit(0.011, 100.0), None).await.unwrap();
    let handle = handle
        .on_rejected(move |_reason| panic!("user callback panic"))
        .on_rejected(move |reason| {
            assert!(!reason.is_empty());
            fired_clone.fetch_add(1, Ordering::Relaxed);
        });

    assert_eq!(fired.load(Ordering::Relaxed), 1);
    assert_eq!(handle.wait().await.status, OutcomeStatus::Rejected);
}

#[tokio::test]
async fn batch_of_sixteen_rejected_wholesale() {
    let venue = MockVenue::new();
    let manager = manager(Arc::clone(&venue));

    let batch: Vec<_> = (0..16).map(|_| limit(0.5, 10.0)).collect();
    let result = manager.create_batch_orders(batch).await;
    assert!(result.is_err());
    assert_eq!(venue.submission_count(), 0);

    let batch: Vec<_> = (0..15).map(|_| limit(0.5, 10.0)).collect();
    let result = manager.create_batch_orders(batch).await.unwrap();
    assert_eq!(result.success_count(), 15);
    assert_eq!(venue.submission_count(), 15);
    assert_eq!(manager.watched_count(), 15);
}

#[tokio::test]
async fn watch_and_start_are_idempotent() {
    let venue = MockVenue::new();
    let manager = manager(Arc::clone(&venue));

    // Second start is a no-op
    manager.start().unwrap();

    let handle = manager.create_order(limit(0.5, 100.0), None).await.unwrap();
    let order_id = handle.order_id().unwrap();
    assert_eq!(manager.watched_count(), 1);

    manager.watch_order(&order_id, None);
    manager.watch_order(&order_id, None);
    assert_eq!(manager.watched_count(), 1);
}

#[tokio::test]
async fn user_cancel_reports_user_reason_and_unwatches() {
    let venue = MockVenue::new();
    let manager = manager(Arc::clone(&venue));
    let mut rx = manager.events();

    let handle = manager.create_order(limit(0.5, 100.0), None).await.unwrap();
    let order_id = handle.order_id().unwrap();
    manager.poll_now(&order_id).await.unwrap();
    drain(&mut rx);

    let confirmed = manager.cancel_order(&order_id).await.unwrap();
    assert!(confirmed);

    let events = drain(&mut rx);
    match events
        .iter()
        .find(|e| e.name() == "order_cancelled")
        .expect("cancel event")
    {
        OrderEvent::Cancelled { reason, .. } => {
            assert_eq!(reason.to_string(), "user");
        }
        _ => unreachable!(),
    }
    assert_eq!(manager.watched_count(), 0);
}
