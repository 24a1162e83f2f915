//! Dip-arb round lifecycle: happy path, leg-2 timeout unwind, rotation,
//! and the redemption queue.

mod common;

use common::{MockCtf, MockVenue};
use chrono::Utc;
use polydip::config::{AutoRotateConfig, DipArbConfig, SettleStrategy};
use polydip::ctf::{CtfClient, CtfOps};
use polydip::domain::{MarketDescriptor, MarketDuration, OutcomeSide, Underlying};
use polydip::oms::{OrderManager, OrderManagerSettings, WatchMode};
use polydip::oracle::OraclePrices;
use polydip::strategy::diparb::{
    DipArbEngine, DipArbEvent, PendingRedemption, RotationScheduler, RoundPhase,
};
use polydip::venue::{Resolution, VenueApi};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn market(end_time_ms: i64) -> MarketDescriptor {
    MarketDescriptor {
        condition_id: "0xc0ffee".to_string(),
        slug: "btc-up-or-down".to_string(),
        up_token_id: "token-up".to_string(),
        down_token_id: "token-down".to_string(),
        underlying: Underlying::Btc,
        duration_minutes: 5,
        end_time_ms,
    }
}

fn diparb_cfg() -> DipArbConfig {
    DipArbConfig {
        dip_threshold: 0.02,
        sliding_window_ms: 3000,
        window_minutes: 10.0,
        max_slippage: 0.02,
        split_orders: 1,
        shares: 20.0,
        execution_cooldown_ms: 0,
        leg2_timeout_seconds: 60,
        sum_target: 1.0,
        auto_merge: true,
        ..Default::default()
    }
}

struct Fixture {
    venue: Arc<MockVenue>,
    ctf: Arc<MockCtf>,
    engine: DipArbEngine,
}

/// Engine wired to auto-filling mocks; the manager polls every 20 ms so
/// handles resolve while a leg awaits its fills.
fn fixture(cfg: DipArbConfig, market: MarketDescriptor) -> Fixture {
    let venue = MockVenue::new();
    venue.auto_fill_market.store(true, Ordering::Relaxed);
    venue.auto_fill_limit.store(true, Ordering::Relaxed);

    let venue_dyn: Arc<dyn VenueApi> = venue.clone();
    let manager = OrderManager::new(
        venue_dyn,
        OrderManagerSettings {
            mode: WatchMode::Polling,
            polling_interval: Duration::from_millis(20),
            polygon_rpc_url: None,
            chain_id: 137,
        },
    );
    manager.start().unwrap();

    let ctf = MockCtf::new();
    let ctf_dyn: Arc<dyn CtfClient> = ctf.clone();
    let ctf_ops = Arc::new(CtfOps::new(ctf_dyn));
    let oracle = Arc::new(OraclePrices::new());

    let engine = DipArbEngine::new(cfg, market, Arc::new(manager), ctf_ops, oracle);
    engine.start();

    Fixture { venue, ctf, engine }
}

fn event_names(engine: &DipArbEngine) -> Vec<&'static str> {
    let rx = engine.events();
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    names
}

#[tokio::test]
async fn dip_round_happy_path_with_auto_merge() {
    let t0 = Utc::now().timestamp_millis();
    let fx = fixture(diparb_cfg(), market(t0 + 300_000));
    *fx.venue.fill_price.lock() = 0.47;

    // First book activity creates the round and seeds the window
    fx.engine.on_quote_update("token-up", Some(0.50), Some(0.49));
    fx.engine.on_quote_update("token-down", Some(0.52), Some(0.51));
    assert!(fx.engine.tick(t0).is_none());
    let round = fx.engine.current_round().expect("round created");
    assert_eq!(round.phase, RoundPhase::Waiting);

    // Up ask drops 0.50 -> 0.47 within the window: 6% dip, leg 1 fires
    fx.engine.on_quote_update("token-up", Some(0.47), Some(0.46));
    let action = fx.engine.tick(t0 + 3_100).expect("leg-1 action");
    fx.engine.drive(action).await;

    let round = fx.engine.current_round().unwrap();
    assert_eq!(round.phase, RoundPhase::Leg1Filled);
    let leg1 = round.leg1.clone().expect("leg 1 recorded");
    assert_eq!(leg1.side, OutcomeSide::Up);
    assert!(leg1.shares > 0.0);
    assert!(leg1.filled_at_ms.is_some());

    // Opposite ask at 0.48: total cost 0.47 + 0.48*1.02 <= 1.0, leg 2 fires
    fx.engine.on_quote_update("token-down", Some(0.48), Some(0.47));
    let action = fx.engine.tick(t0 + 4_000).expect("leg-2 action");
    fx.engine.drive(action).await;

    let round = fx.engine.current_round().unwrap();
    assert_eq!(round.phase, RoundPhase::Completed);
    let leg2 = round.leg2.clone().expect("leg 2 recorded");

    // The hedge invariant: leg-2 size equals leg-1 size exactly
    assert!(
        (leg2.shares - leg1.shares).abs() < 1e-9,
        "leg2.shares {} != leg1.shares {}",
        leg2.shares,
        leg1.shares
    );
    assert!(round.total_cost.unwrap() < 1.0);
    assert!(round.merged);

    // Auto-merge burned min(leg1, leg2) pairs
    let merges = fx.ctf.merges.lock();
    assert_eq!(merges.len(), 1);
    assert_eq!(merges[0].0, "0xc0ffee");
    assert!((merges[0].1 - leg1.shares.min(leg2.shares)).abs() < 1e-9);
    drop(merges);

    let names = event_names(&fx.engine);
    for expected in [
        "started",
        "newRound",
        "signal",
        "execution",
        "signal",
        "execution",
        "roundComplete",
        "settled",
    ] {
        assert!(
            names.contains(&expected),
            "missing {:?} in {:?}",
            expected,
            names
        );
    }
    // Exactly two signals and two executions, both successful
    assert_eq!(names.iter().filter(|n| **n == "signal").count(), 2);
    assert_eq!(names.iter().filter(|n| **n == "execution").count(), 2);
}

#[tokio::test]
async fn leg2_timeout_triggers_emergency_exit() {
    let t0 = Utc::now().timestamp_millis();
    let fx = fixture(diparb_cfg(), market(t0 + 3_600_000));
    *fx.venue.fill_price.lock() = 0.47;

    fx.engine.on_quote_update("token-up", Some(0.50), Some(0.49));
    fx.engine.on_quote_update("token-down", Some(0.56), Some(0.55));
    fx.engine.tick(t0);

    fx.engine.on_quote_update("token-up", Some(0.47), Some(0.46));
    let action = fx.engine.tick(t0 + 3_100).expect("leg-1 action");
    fx.engine.drive(action).await;
    assert_eq!(
        fx.engine.current_round().unwrap().phase,
        RoundPhase::Leg1Filled
    );

    // Opposite stays too expensive; no leg-2 action while within timeout
    assert!(fx.engine.tick(t0 + 10_000).is_none());

    // Past the timeout the round expires and the engine unwinds leg 1
    let past_timeout = Utc::now().timestamp_millis() + 61_000;
    let action = fx.engine.tick(past_timeout).expect("emergency exit action");
    fx.engine.drive(action).await;

    let round = fx.engine.current_round().unwrap();
    assert_eq!(round.phase, RoundPhase::Expired);

    let rx = fx.engine.events();
    let mut exit_seen = false;
    while let Ok(event) = rx.try_recv() {
        if let DipArbEvent::RoundComplete { exit: Some(exit), .. } = event {
            exit_seen = true;
            assert!(exit.attempted);
            assert!(exit.success, "exit sell should fill: {:?}", exit.reason);
            assert!(exit.recovered > 0.0);
        }
    }
    assert!(exit_seen, "roundComplete with an exit result expected");
}

#[tokio::test]
async fn rotation_enqueues_redemption_and_switches_market() {
    let t0 = Utc::now().timestamp_millis();
    let current = market(t0 + 300_000);
    let fx = fixture(diparb_cfg(), current.clone());
    *fx.venue.fill_price.lock() = 0.47;

    // Open a leg-1 position
    fx.engine.on_quote_update("token-up", Some(0.50), Some(0.49));
    fx.engine.on_quote_update("token-down", Some(0.56), Some(0.55));
    fx.engine.tick(t0);
    fx.engine.on_quote_update("token-up", Some(0.47), Some(0.46));
    let action = fx.engine.tick(t0 + 3_100).expect("leg-1 action");
    fx.engine.drive(action).await;

    let next = MarketDescriptor {
        condition_id: "0xnext".to_string(),
        slug: "btc-up-or-down-next".to_string(),
        up_token_id: "token-up-2".to_string(),
        down_token_id: "token-down-2".to_string(),
        underlying: Underlying::Btc,
        duration_minutes: 5,
        end_time_ms: t0 + 600_000,
    };
    *fx.venue.scan_results.lock() = vec![next.clone()];

    let ctf_dyn: Arc<dyn CtfClient> = fx.ctf.clone();
    let ctf_ops = Arc::new(CtfOps::new(ctf_dyn));
    let venue_dyn: Arc<dyn VenueApi> = fx.venue.clone();
    let manager = OrderManager::new(
        venue_dyn,
        OrderManagerSettings::default(),
    );
    manager.start().unwrap();
    let venue_dyn: Arc<dyn VenueApi> = fx.venue.clone();
    let scheduler = RotationScheduler::new(
        AutoRotateConfig {
            underlyings: vec![Underlying::Btc],
            duration: MarketDuration::FiveMinutes,
            auto_settle: true,
            settle_strategy: SettleStrategy::Redeem,
            preload_minutes: 2.0,
            redeem_wait_minutes: 0.0,
            redeem_retry_interval_seconds: 30,
        },
        fx.engine.clone(),
        venue_dyn,
        ctf_ops,
        Arc::new(manager),
    );

    // Inside the preload window: next market cached, no rotation yet
    scheduler.rotation_tick(current.end_time_ms - 60_000).await;
    assert_eq!(fx.engine.market().condition_id, "0xc0ffee");
    assert_eq!(scheduler.pending_count(), 0);

    // Past market end: position queued for redemption, engine rotated
    scheduler.rotation_tick(current.end_time_ms + 1_000).await;
    assert_eq!(scheduler.pending_count(), 1);
    assert_eq!(fx.engine.market().condition_id, "0xnext");

    let names = event_names(&fx.engine);
    assert!(names.contains(&"rotate"), "rotate event expected: {:?}", names);
}

#[tokio::test]
async fn redemption_queue_waits_for_resolution_and_caps_retries() {
    let t0 = Utc::now().timestamp_millis();
    let m = market(t0 - 600_000);
    let fx = fixture(diparb_cfg(), m.clone());

    let ctf_dyn: Arc<dyn CtfClient> = fx.ctf.clone();
    let ctf_ops = Arc::new(CtfOps::new(ctf_dyn));
    let venue_dyn: Arc<dyn VenueApi> = fx.venue.clone();
    let manager = OrderManager::new(
        venue_dyn,
        OrderManagerSettings::default(),
    );
    manager.start().unwrap();
    let venue_dyn: Arc<dyn VenueApi> = fx.venue.clone();
    let scheduler = RotationScheduler::new(
        AutoRotateConfig {
            underlyings: vec![Underlying::Btc],
            redeem_wait_minutes: 0.0,
            ..Default::default()
        },
        fx.engine.clone(),
        venue_dyn,
        ctf_ops,
        Arc::new(manager),
    );

    fx.ctf.set_balance("token-up", 20.0);
    scheduler.enqueue_redemption(PendingRedemption {
        market: m.clone(),
        round_id: "round-1".to_string(),
        market_end_ms: m.end_time_ms,
        added_at_ms: t0,
        retry_count: 0,
        last_retry_ms: None,
    });

    // Unresolved: the entry stays queued and its retry counter climbs
    scheduler.redeem_tick(t0).await;
    assert_eq!(scheduler.pending_count(), 1);
    assert_eq!(scheduler.pending_snapshot()[0].retry_count, 1);
    assert!(fx.ctf.redeems.lock().is_empty());

    // Resolved: redeemed, removed, settled event emitted
    fx.ctf.set_resolution(
        "0xc0ffee",
        Resolution {
            resolved: true,
            winning_token_id: Some("token-up".to_string()),
        },
    );
    scheduler.redeem_tick(t0 + 1_000).await;
    assert_eq!(scheduler.pending_count(), 0);
    assert_eq!(fx.ctf.redeems.lock().as_slice(), ["0xc0ffee".to_string()]);

    let names = event_names(&fx.engine);
    assert!(names.contains(&"settled"), "settled expected: {:?}", names);

    // Retry cap: an entry that keeps failing is dropped after 20 attempts
    fx.ctf.set_resolution(
        "0xc0ffee",
        Resolution {
            resolved: false,
            winning_token_id: None,
        },
    );
    scheduler.enqueue_redemption(PendingRedemption {
        market: m.clone(),
        round_id: "round-2".to_string(),
        market_end_ms: m.end_time_ms,
        added_at_ms: t0,
        retry_count: 0,
        last_retry_ms: None,
    });
    for i in 0..21 {
        scheduler.redeem_tick(t0 + 2_000 + i).await;
    }
    assert_eq!(scheduler.pending_count(), 0, "entry dropped after retry cap");
}

#[tokio::test]
async fn market_end_before_leg1_expires_round() {
    let t0 = Utc::now().timestamp_millis();
    let fx = fixture(diparb_cfg(), market(t0 + 5_000));

    fx.engine.on_quote_update("token-up", Some(0.50), Some(0.49));
    fx.engine.on_quote_update("token-down", Some(0.50), Some(0.49));
    fx.engine.tick(t0);
    assert_eq!(
        fx.engine.current_round().unwrap().phase,
        RoundPhase::Waiting
    );

    // Past market end with no position: the round just expires
    assert!(fx.engine.tick(t0 + 6_000).is_none());
    assert_eq!(
        fx.engine.current_round().unwrap().phase,
        RoundPhase::Expired
    );

    let names = event_names(&fx.engine);
    assert!(names.contains(&"roundComplete"));
}
