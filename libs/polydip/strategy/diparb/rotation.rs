//! Market rotation and post-resolution redemption.
//!
//! Two periodic loops run once auto-rotation is enabled: the rotation check
//! preloads the next market and rotates the engine when the current one
//! ends, and the redemption check drains the pending-redemption queue with
//! bounded retries. Enabling auto-rotation first runs a recovery scan over
//! recently ended markets so a crash-restart never leaks positions past
//! resolution.

use crate::config::{AutoRotateConfig, SettleStrategy};
use crate::ctf::CtfOps;
use crate::domain::{MarketDescriptor, OrderKind, Side};
use crate::oms::{OrderManager, OrderMeta};
use crate::strategy::diparb::engine::DipArbEngine;
use crate::strategy::diparb::types::{DipArbEvent, RoundPhase};
use crate::venue::{MarketScanFilter, VenueApi};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Interval of the rotation check loop
const ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// A pending entry gives up after this many redemption attempts
const MAX_REDEEM_RETRIES: u32 = 20;

/// Recovery scan look-back, minutes before now
const RECOVERY_LOOKBACK_MINUTES: i64 = -60;

/// A round whose position awaits post-resolution redemption
#[derive(Debug, Clone)]
pub struct PendingRedemption {
    pub market: MarketDescriptor,
    pub round_id: String,
    pub market_end_ms: i64,
    pub added_at_ms: i64,
    pub retry_count: u32,
    pub last_retry_ms: Option<i64>,
}

pub struct RotationScheduler {
    inner: Arc<RotationInner>,
}

struct RotationInner {
    cfg: AutoRotateConfig,
    engine: DipArbEngine,
    venue: Arc<dyn VenueApi>,
    ctf: Arc<CtfOps>,
    orders: Arc<OrderManager>,
    pending: Mutex<Vec<PendingRedemption>>,
    next_market: Mutex<Option<MarketDescriptor>>,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RotationScheduler {
    pub fn new(
        cfg: AutoRotateConfig,
        engine: DipArbEngine,
        venue: Arc<dyn VenueApi>,
        ctf: Arc<CtfOps>,
        orders: Arc<OrderManager>,
    ) -> Self {
        Self {
            inner: Arc::new(RotationInner {
                cfg,
                engine,
                venue,
                ctf,
                orders,
                pending: Mutex::new(Vec::new()),
                next_market: Mutex::new(None),
                running: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Enable auto-rotation: recovery scan first, then the two loops.
    pub async fn enable_auto_rotate(&self) -> anyhow::Result<()> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            debug!("auto-rotate already enabled");
            return Ok(());
        }

        self.inner.recovery_scan().await;

        let rotation = Arc::clone(&self.inner);
        let rotation_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ROTATION_CHECK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !rotation.running.load(Ordering::Acquire) {
                    break;
                }
                rotation.rotation_tick(Utc::now().timestamp_millis()).await;
            }
        });

        let redeem = Arc::clone(&self.inner);
        let redeem_interval = Duration::from_secs(self.inner.cfg.redeem_retry_interval_seconds);
        let redeem_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(redeem_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !redeem.running.load(Ordering::Acquire) {
                    break;
                }
                redeem.redeem_tick(Utc::now().timestamp_millis()).await;
            }
        });

        let mut tasks = self.inner.tasks.lock();
        tasks.push(rotation_task);
        tasks.push(redeem_task);

        info!("auto-rotation enabled");
        Ok(())
    }

    /// Stop the loops. The pending-redemption queue is left intact; a
    /// warning is logged when entries remain.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        let remaining = self.inner.pending.lock().len();
        if remaining > 0 {
            warn!(
                remaining,
                "stopping with pending redemptions still queued; they are kept"
            );
        }
        info!("auto-rotation stopped");
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn pending_snapshot(&self) -> Vec<PendingRedemption> {
        self.inner.pending.lock().clone()
    }

    /// One rotation iteration; loops call this with the wall clock, tests
    /// drive it directly.
    pub async fn rotation_tick(&self, now_ms: i64) {
        self.inner.rotation_tick(now_ms).await;
    }

    /// One redemption iteration.
    pub async fn redeem_tick(&self, now_ms: i64) {
        self.inner.redeem_tick(now_ms).await;
    }

    /// Queue a round's position for redemption (also used by tests).
    pub fn enqueue_redemption(&self, entry: PendingRedemption) {
        self.inner.pending.lock().push(entry);
    }
}

impl RotationInner {
    async fn rotation_tick(self: &Arc<Self>, now_ms: i64) {
        let market = self.engine.market();
        let time_until_end = market.end_time_ms - now_ms;
        let preload_ms = (self.cfg.preload_minutes * 60_000.0) as i64;

        // Preload the next market shortly before the current one ends
        if time_until_end <= preload_ms && self.next_market.lock().is_none() {
            if let Some(next) = self.scan_next(&market).await {
                info!(slug = %next.slug, "next market preloaded");
                *self.next_market.lock() = Some(next);
            }
        }

        if time_until_end > 0 {
            return;
        }

        // Market ended: settle the open position, then rotate
        if self.cfg.auto_settle {
            self.settle_current(now_ms).await;
        }

        let next = {
            let preloaded = self.next_market.lock().take();
            match preloaded {
                Some(next) => Some(next),
                None => self.scan_next(&market).await,
            }
        };

        match next {
            Some(next) => {
                let from = market.slug.clone();
                let to = next.slug.clone();
                self.engine.switch_market(next);
                self.engine.publish(DipArbEvent::Rotate { from, to });
            }
            None => warn!("market ended but no next market found"),
        }
    }

    async fn scan_next(&self, current: &MarketDescriptor) -> Option<MarketDescriptor> {
        let filter = MarketScanFilter {
            underlyings: self.cfg.underlyings.clone(),
            duration: Some(self.cfg.duration),
            min_minutes_until_end: 0,
        };
        match self.venue.scan_upcoming_markets(&filter).await {
            Ok(mut markets) => {
                markets.retain(|m| m.condition_id != current.condition_id);
                markets.sort_by_key(|m| m.end_time_ms);
                markets.into_iter().next()
            }
            Err(e) => {
                warn!("market scan failed: {}", e);
                None
            }
        }
    }

    /// Settle the current round's held position at market end.
    async fn settle_current(self: &Arc<Self>, now_ms: i64) {
        let Some(round) = self.engine.current_round() else {
            return;
        };
        let held = round.held_legs();
        if held.is_empty() {
            return;
        }

        match self.cfg.settle_strategy {
            SettleStrategy::Redeem => {
                info!(round_id = %round.round_id, "queueing round for redemption");
                self.pending.lock().push(PendingRedemption {
                    market: round.market.clone(),
                    round_id: round.round_id.clone(),
                    market_end_ms: round.market.end_time_ms,
                    added_at_ms: now_ms,
                    retry_count: 0,
                    last_retry_ms: None,
                });
            }
            SettleStrategy::Sell => {
                for leg in held {
                    let Some(bid) = self.engine.best_bid(&leg.token_id) else {
                        warn!(token = %leg.token_id, "no bid to sell into, skipping");
                        continue;
                    };
                    let price = ((bid * 100.0).round() / 100.0).clamp(0.01, 0.99);
                    let params = crate::venue::LimitOrderParams {
                        token_id: leg.token_id.clone(),
                        side: Side::Sell,
                        price,
                        size: leg.shares,
                        kind: OrderKind::FAK,
                        expiration: None,
                    };
                    let meta = OrderMeta {
                        kind: OrderKind::FAK,
                        tag: Some("rotation_sell".to_string()),
                    };
                    match self.orders.create_order(params, Some(meta)).await {
                        Ok(handle) => {
                            debug!(token = %leg.token_id, "rotation sell submitted");
                            drop(handle);
                        }
                        Err(e) => warn!("rotation sell failed: {}", e),
                    }
                }
            }
        }

        if round.phase == RoundPhase::Leg1Filled {
            debug!(round_id = %round.round_id, "round ended with an open leg-1 position");
        }
    }

    /// Drain due pending redemptions: bump retries, check resolution,
    /// redeem and emit `settled` on success.
    async fn redeem_tick(self: &Arc<Self>, now_ms: i64) {
        let wait_ms = (self.cfg.redeem_wait_minutes * 60_000.0) as i64;

        let due: Vec<String> = self
            .pending
            .lock()
            .iter()
            .filter(|p| now_ms - p.market_end_ms >= wait_ms)
            .map(|p| p.round_id.clone())
            .collect();

        for round_id in due {
            // Bump the retry counter first; the cap bounds total attempts
            let entry = {
                let mut pending = self.pending.lock();
                let Some(idx) = pending.iter().position(|p| p.round_id == round_id) else {
                    continue;
                };
                pending[idx].retry_count += 1;
                pending[idx].last_retry_ms = Some(now_ms);
                if pending[idx].retry_count > MAX_REDEEM_RETRIES {
                    warn!(
                        round_id = %round_id,
                        "giving up redemption after {} retries", MAX_REDEEM_RETRIES
                    );
                    pending.remove(idx);
                    continue;
                }
                pending[idx].clone()
            };

            let condition_id = entry.market.condition_id.clone();
            match self.ctf.get_market_resolution(&condition_id).await {
                Ok(resolution) if resolution.resolved => {
                    let tokens = (
                        entry.market.up_token_id.as_str(),
                        entry.market.down_token_id.as_str(),
                    );
                    match self.ctf.redeem_by_token_ids(&condition_id, tokens).await {
                        Ok(receipt) => {
                            self.pending.lock().retain(|p| p.round_id != round_id);
                            info!(
                                round_id = %round_id,
                                amount = receipt.amount,
                                "position redeemed"
                            );
                            self.engine.publish(DipArbEvent::Settled {
                                condition_id,
                                amount: receipt.amount,
                            });
                        }
                        Err(e) => warn!(round_id = %round_id, "redeem failed: {}", e),
                    }
                }
                Ok(_) => {
                    debug!(round_id = %round_id, "market not yet resolved, staying in queue");
                }
                Err(e) => warn!(round_id = %round_id, "resolution check failed: {}", e),
            }
        }
    }

    /// Recovery scan over recently ended markets: resolved winners go into
    /// the redemption queue; unresolved mergeable pairs are merged at once.
    async fn recovery_scan(self: &Arc<Self>) {
        let filter = MarketScanFilter {
            underlyings: self.cfg.underlyings.clone(),
            duration: Some(self.cfg.duration),
            min_minutes_until_end: RECOVERY_LOOKBACK_MINUTES,
        };
        let markets = match self.venue.scan_upcoming_markets(&filter).await {
            Ok(markets) => markets,
            Err(e) => {
                warn!("recovery scan failed: {}", e);
                return;
            }
        };

        let now_ms = Utc::now().timestamp_millis();
        for market in markets {
            if market.end_time_ms > now_ms {
                continue;
            }

            let up = self
                .ctf
                .get_position_balance(&market.up_token_id)
                .await
                .unwrap_or(0.0);
            let down = self
                .ctf
                .get_position_balance(&market.down_token_id)
                .await
                .unwrap_or(0.0);
            if up <= 0.0 && down <= 0.0 {
                continue;
            }

            let resolution = match self.ctf.get_market_resolution(&market.condition_id).await {
                Ok(resolution) => resolution,
                Err(e) => {
                    warn!(condition_id = %market.condition_id, "resolution check failed: {}", e);
                    continue;
                }
            };

            if resolution.resolved {
                let winning_balance = match resolution.winning_token_id.as_deref() {
                    Some(id) if id == market.up_token_id => up,
                    Some(id) if id == market.down_token_id => down,
                    _ => up.max(down),
                };
                if winning_balance > 0.0 {
                    info!(
                        condition_id = %market.condition_id,
                        winning_balance,
                        "leftover winning position found, queueing redemption"
                    );
                    self.pending.lock().push(PendingRedemption {
                        round_id: format!("recovered-{}", market.slug),
                        market_end_ms: market.end_time_ms,
                        added_at_ms: now_ms,
                        retry_count: 0,
                        last_retry_ms: None,
                        market,
                    });
                }
            } else if up.min(down) > 0.0 {
                let mergeable = up.min(down);
                info!(
                    condition_id = %market.condition_id,
                    mergeable,
                    "leftover pair balance found, merging"
                );
                if let Err(e) = self.ctf.merge_pairs(&market.condition_id, mergeable).await {
                    warn!(condition_id = %market.condition_id, "recovery merge failed: {}", e);
                }
            }
        }
    }
}
