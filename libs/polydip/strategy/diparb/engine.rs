//! Dip arbitrage engine.
//!
//! Orderbook events are handled synchronously on the bus delivery task: the
//! engine updates its quotes, advances the round, and decides on at most
//! one [`EngineAction`]. All network I/O (order submission, merges, the
//! emergency exit) runs in spawned tasks so signal detection never blocks
//! the feed. A single `is_executing` flag plus a cooldown serialize
//! executions.

use crate::bus::{MarketHandlers, RealtimeBus, Subscription};
use crate::config::DipArbConfig;
use crate::ctf::CtfOps;
use crate::domain::{MarketDescriptor, OrderKind, OutcomeSide, Side, Underlying};
use crate::oms::{OrderManager, OrderMeta, OutcomeStatus};
use crate::oracle::SharedOraclePrices;
use crate::strategy::diparb::signal::{detect_leg1, PriceSample, PriceWindow};
use crate::strategy::diparb::types::{DipArbEvent, ExitResult, LegFill, Round, RoundPhase};
use crate::venue::{LimitOrderParams, MarketOrderParams};
use crate::wire::{BookSnapshot, MarketResolved, PriceChange};
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a leg waits for its orders to resolve before giving up
const LEG_FILL_WAIT: Duration = Duration::from_secs(10);

/// Top-of-book quote per outcome token
#[derive(Debug, Clone, Copy, Default)]
struct Quote {
    ask: f64,
    bid: f64,
}

/// Asynchronous work decided by a synchronous tick
#[derive(Debug, Clone)]
pub enum EngineAction {
    ExecuteLeg1 { side: OutcomeSide, ask: f64 },
    ExecuteLeg2 { side: OutcomeSide, shares: f64, ask: f64 },
    EmergencyExit { leg1: LegFill, bid: f64 },
}

#[derive(Clone)]
pub struct DipArbEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    cfg: DipArbConfig,
    market: RwLock<MarketDescriptor>,
    window: Mutex<PriceWindow>,
    round: Mutex<Option<Round>>,
    quotes: Mutex<HashMap<String, Quote>>,
    oracle: SharedOraclePrices,
    orders: Arc<OrderManager>,
    ctf: Arc<CtfOps>,
    is_executing: AtomicBool,
    last_execution_ms: AtomicI64,
    running: AtomicBool,
    events_tx: Sender<DipArbEvent>,
    events_rx: Receiver<DipArbEvent>,
    bus: Mutex<Option<Arc<RealtimeBus>>>,
    subscription: Mutex<Option<Subscription>>,
}

/// Bus adapter: quotes in, at most one spawned action out
struct EngineFeed {
    engine: DipArbEngine,
}

impl MarketHandlers for EngineFeed {
    fn on_orderbook(&self, book: &BookSnapshot, ts_ms: i64) {
        let best_ask = book.asks.first().map(|l| l.price_f64()).unwrap_or(0.0);
        let best_bid = book.bids.first().map(|l| l.price_f64()).unwrap_or(0.0);
        self.engine.on_quote_update(
            &book.asset_id,
            (best_ask > 0.0).then_some(best_ask),
            (best_bid > 0.0).then_some(best_bid),
        );
        self.engine.spawn_tick(ts_ms);
    }

    fn on_price_change(&self, change: &PriceChange, ts_ms: i64) {
        let ask = change.best_ask.as_deref().and_then(|s| s.parse().ok());
        let bid = change.best_bid.as_deref().and_then(|s| s.parse().ok());
        self.engine.on_quote_update(&change.asset_id, ask, bid);
        self.engine.spawn_tick(ts_ms);
    }

    fn on_underlying_price(&self, underlying: Underlying, price: f64, _ts_ms: i64) {
        self.engine.inner.emit(DipArbEvent::PriceUpdate { underlying, price });
    }

    fn on_market_resolved(&self, resolved: &MarketResolved, _ts_ms: i64) {
        debug!(market = %resolved.market, "market resolved event received");
    }
}

impl DipArbEngine {
    pub fn new(
        cfg: DipArbConfig,
        market: MarketDescriptor,
        orders: Arc<OrderManager>,
        ctf: Arc<CtfOps>,
        oracle: SharedOraclePrices,
    ) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            inner: Arc::new(EngineInner {
                cfg,
                market: RwLock::new(market),
                window: Mutex::new(PriceWindow::new()),
                round: Mutex::new(None),
                quotes: Mutex::new(HashMap::new()),
                oracle,
                orders,
                ctf,
                is_executing: AtomicBool::new(false),
                last_execution_ms: AtomicI64::new(0),
                running: AtomicBool::new(false),
                events_tx,
                events_rx,
                bus: Mutex::new(None),
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Subscribe this engine to its market's outcome tokens on the bus.
    pub fn attach_bus(&self, bus: Arc<RealtimeBus>) -> crate::bus::Result<()> {
        let market = self.inner.market.read().clone();
        let feed = Arc::new(EngineFeed {
            engine: self.clone(),
        });
        let sub = bus.subscribe_market(
            vec![market.up_token_id.clone(), market.down_token_id.clone()],
            feed,
        )?;
        *self.inner.subscription.lock() = Some(sub);
        *self.inner.bus.lock() = Some(bus);
        Ok(())
    }

    /// Start trading: reconcile pre-existing pair balances, then accept
    /// orderbook ticks.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            debug!("engine already running");
            return;
        }

        // Startup reconciliation runs in the background; a failure must not
        // keep the engine from trading
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let market = inner.market.read().clone();
            match inner.ctf.reconcile_pairs(&market).await {
                Ok(amount) if amount > 0.0 => {
                    inner.emit(DipArbEvent::Settled {
                        condition_id: market.condition_id.clone(),
                        amount,
                    });
                }
                Ok(_) => {}
                Err(e) => inner.emit(DipArbEvent::Error {
                    message: format!("startup reconciliation failed: {}", e),
                }),
            }
        });

        self.inner.emit(DipArbEvent::Started);
        info!(market = %self.inner.market.read().slug, "dip-arb engine started");
    }

    /// Stop trading: cancel the bus subscription and stop accepting ticks.
    /// Pending redemptions are owned by the rotation scheduler and survive.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(sub) = self.inner.subscription.lock().take() {
            sub.unsubscribe();
        }
        // Full shutdown also forces the bus connections closed
        if let Some(bus) = self.inner.bus.lock().clone() {
            bus.disconnect();
        }
        self.inner.emit(DipArbEvent::Stopped);
        info!("dip-arb engine stopped");
    }

    /// Strategy event stream.
    pub fn events(&self) -> Receiver<DipArbEvent> {
        self.inner.events_rx.clone()
    }

    /// Publish an event on the strategy stream (rotation scheduler path).
    pub fn publish(&self, event: DipArbEvent) {
        self.inner.emit(event);
    }

    pub fn market(&self) -> MarketDescriptor {
        self.inner.market.read().clone()
    }

    pub fn current_round(&self) -> Option<Round> {
        self.inner.round.lock().clone()
    }

    pub fn best_ask(&self, token_id: &str) -> Option<f64> {
        let quotes = self.inner.quotes.lock();
        quotes.get(token_id).map(|q| q.ask).filter(|a| *a > 0.0)
    }

    pub fn best_bid(&self, token_id: &str) -> Option<f64> {
        let quotes = self.inner.quotes.lock();
        quotes.get(token_id).map(|q| q.bid).filter(|b| *b > 0.0)
    }

    /// Swap to the next market without dropping events: quotes, window, and
    /// round reset, and the bus subscription is replaced in place.
    pub fn switch_market(&self, next: MarketDescriptor) {
        let old = {
            let mut market = self.inner.market.write();
            std::mem::replace(&mut *market, next.clone())
        };
        *self.inner.round.lock() = None;
        self.inner.window.lock().clear();
        self.inner.quotes.lock().clear();

        let bus = self.inner.bus.lock().clone();
        if let Some(bus) = bus {
            if let Some(sub) = self.inner.subscription.lock().take() {
                sub.unsubscribe();
            }
            let feed = Arc::new(EngineFeed {
                engine: self.clone(),
            });
            match bus.subscribe_market(
                vec![next.up_token_id.clone(), next.down_token_id.clone()],
                feed,
            ) {
                Ok(sub) => *self.inner.subscription.lock() = Some(sub),
                Err(e) => self.inner.emit(DipArbEvent::Error {
                    message: format!("resubscribe after rotation failed: {}", e),
                }),
            }
        }

        info!(from = %old.slug, to = %next.slug, "switched market");
    }

    /// Record a top-of-book quote for one outcome token.
    pub fn on_quote_update(&self, token_id: &str, ask: Option<f64>, bid: Option<f64>) {
        let mut quotes = self.inner.quotes.lock();
        let quote = quotes.entry(token_id.to_string()).or_default();
        if let Some(ask) = ask {
            quote.ask = ask;
        }
        if let Some(bid) = bid {
            quote.bid = bid;
        }
    }

    /// Synchronous decision step: advance the round for the current quotes
    /// and return the action to run, if any. Never suspends.
    pub fn tick(&self, now_ms: i64) -> Option<EngineAction> {
        self.inner.tick(now_ms)
    }

    /// Run an action decided by [`tick`](Self::tick).
    pub async fn drive(&self, action: EngineAction) {
        self.inner.drive(action).await;
    }

    fn spawn_tick(&self, ts_ms: i64) {
        if let Some(action) = self.tick(ts_ms) {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.drive(action).await;
            });
        }
    }
}

impl EngineInner {
    fn emit(&self, event: DipArbEvent) {
        if self.cfg.debug {
            debug!(event = event.name(), "strategy event");
        }
        let _ = self.events_tx.send(event);
    }

    fn quote_pair(&self, market: &MarketDescriptor) -> (Quote, Quote) {
        let quotes = self.quotes.lock();
        let up = quotes.get(&market.up_token_id).copied().unwrap_or_default();
        let down = quotes
            .get(&market.down_token_id)
            .copied()
            .unwrap_or_default();
        (up, down)
    }

    fn tick(&self, now_ms: i64) -> Option<EngineAction> {
        if !self.running.load(Ordering::Acquire) {
            return None;
        }

        let market = self.market.read().clone();
        let (up, down) = self.quote_pair(&market);

        let mut round_guard = self.round.lock();

        // Round creation: first book activity on a market that has not
        // ended yet
        if round_guard.is_none() {
            if market.end_time_ms <= now_ms {
                return None;
            }
            let price_to_beat = self
                .oracle
                .get(market.underlying)
                .map(|p| p.price)
                .unwrap_or(0.0);
            let round = Round::new(market.clone(), now_ms, price_to_beat, up.ask, down.ask);
            self.window.lock().clear();
            let round_id = round.round_id.clone();
            info!(round_id = %round_id, price_to_beat, "round started");
            *round_guard = Some(round);
            self.emit(DipArbEvent::NewRound { round_id });
        }

        let round = round_guard.as_mut()?;

        match round.phase {
            RoundPhase::Waiting => {
                if market.end_time_ms <= now_ms {
                    round.phase = RoundPhase::Expired;
                    let snapshot = round.clone();
                    info!("market ended before leg 1, round expired");
                    self.emit(DipArbEvent::RoundComplete {
                        round: snapshot,
                        exit: None,
                    });
                    return None;
                }

                if up.ask > 0.0 && down.ask > 0.0 {
                    self.window.lock().push(PriceSample {
                        t_ms: now_ms,
                        up_ask: up.ask,
                        down_ask: down.ask,
                    });
                }

                // Trading window gate
                let elapsed_minutes = (now_ms - round.started_at_ms) as f64 / 60_000.0;
                if elapsed_minutes > self.cfg.window_minutes {
                    return None;
                }

                // Serialize executions
                if self.is_executing.load(Ordering::Acquire) {
                    return None;
                }
                if now_ms - self.last_execution_ms.load(Ordering::Acquire)
                    < self.cfg.execution_cooldown_ms
                {
                    return None;
                }

                let live = self.oracle.get(market.underlying).map(|p| p.price);
                let window = self.window.lock();
                let signal = detect_leg1(
                    &window,
                    now_ms,
                    up.ask,
                    down.ask,
                    round.price_to_beat,
                    live,
                    &self.cfg,
                )?;
                drop(window);

                let ask = match signal.side {
                    OutcomeSide::Up => up.ask,
                    OutcomeSide::Down => down.ask,
                };
                if ask <= 0.0 {
                    return None;
                }

                self.emit(DipArbEvent::Signal {
                    leg: 1,
                    side: signal.side,
                    kind: signal.kind,
                    detail: format!(
                        "{}: {:.4} -> {:.4} ({:.2}%)",
                        signal.kind,
                        signal.reference,
                        signal.current,
                        signal.magnitude * 100.0
                    ),
                });
                Some(EngineAction::ExecuteLeg1 {
                    side: signal.side,
                    ask,
                })
            }

            RoundPhase::Leg1Filled => {
                let leg1 = round.leg1.clone()?;

                // Leg-2 timeout, enforced from the leg-1 fill timestamp. A
                // missing timestamp expires the round at once: waiting on an
                // unknown baseline risks an unbounded naked leg.
                let within_timeout = match leg1.filled_at_ms {
                    Some(filled_at) => {
                        now_ms - filled_at < self.cfg.leg2_timeout_seconds * 1000
                    }
                    None => {
                        warn!("leg-1 fill timestamp missing, expiring round");
                        false
                    }
                };

                if !within_timeout {
                    round.phase = RoundPhase::Expired;
                    let bid = match leg1.side {
                        OutcomeSide::Up => up.bid,
                        OutcomeSide::Down => down.bid,
                    };
                    warn!(
                        round_id = %round.round_id,
                        "leg-2 timeout, attempting emergency exit"
                    );
                    return Some(EngineAction::EmergencyExit { leg1, bid });
                }

                let opp = leg1.side.opposite();
                let opp_ask = match opp {
                    OutcomeSide::Up => up.ask,
                    OutcomeSide::Down => down.ask,
                };
                if opp_ask <= 0.0 {
                    return None;
                }

                let total_cost = leg1.avg_price + opp_ask * (1.0 + self.cfg.max_slippage);
                if total_cost > self.cfg.sum_target {
                    return None;
                }
                if self.is_executing.load(Ordering::Acquire) {
                    return None;
                }

                self.emit(DipArbEvent::Signal {
                    leg: 2,
                    side: opp,
                    kind: crate::strategy::diparb::signal::SignalKind::Dip,
                    detail: format!(
                        "total cost {:.4} <= target {:.4}",
                        total_cost, self.cfg.sum_target
                    ),
                });
                // Leg-2 size must equal leg-1 size for a mergeable hedge
                Some(EngineAction::ExecuteLeg2 {
                    side: opp,
                    shares: leg1.shares,
                    ask: opp_ask,
                })
            }

            RoundPhase::Completed | RoundPhase::Expired => None,
        }
    }

    async fn drive(self: &Arc<Self>, action: EngineAction) {
        // Single-flight: a lost race means another execution is in progress
        if self
            .is_executing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("execution already in progress, dropping action");
            return;
        }

        match action {
            EngineAction::ExecuteLeg1 { side, ask } => self.execute_leg1(side, ask).await,
            EngineAction::ExecuteLeg2 { side, shares, ask } => {
                self.execute_leg2(side, shares, ask).await
            }
            EngineAction::EmergencyExit { leg1, bid } => self.emergency_exit(leg1, bid).await,
        }

        self.last_execution_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        self.is_executing.store(false, Ordering::Release);
    }

    /// Buy the signaled side at market, split across `split_orders`
    /// sequential children to reduce the slippage footprint.
    async fn execute_leg1(self: &Arc<Self>, side: OutcomeSide, ask: f64) {
        let market = self.market.read().clone();
        let token_id = market.token_id(side).to_string();
        let children = self.cfg.split_orders.max(1);
        let child_shares_target = self.cfg.shares / children as f64;

        let mut total_shares = 0.0;
        let mut total_cost = 0.0;
        let mut order_ids = Vec::new();

        for child in 0..children {
            // Re-read the ask per child; earlier children move the book
            let current_ask = self
                .quotes
                .lock()
                .get(&token_id)
                .map(|q| q.ask)
                .filter(|a| *a > 0.0)
                .unwrap_or(ask);
            let price_cap = (current_ask * (1.0 + self.cfg.max_slippage)).min(0.99);

            let mut child_shares = child_shares_target;
            // The venue refuses orders under $1; boost the share count to
            // the ceiling that clears the minimum
            if child_shares * price_cap < 1.0 {
                child_shares = (1.0 / price_cap).ceil();
            }
            let amount = child_shares * price_cap;

            let params = MarketOrderParams {
                token_id: token_id.clone(),
                side: Side::Buy,
                amount,
                kind: OrderKind::FAK,
            };
            let meta = OrderMeta {
                kind: OrderKind::FAK,
                tag: Some("leg1".to_string()),
            };

            match self.orders.create_market_order(params, Some(meta)).await {
                Ok(handle) => {
                    if let Some(id) = handle.order_id() {
                        order_ids.push(id);
                    }
                    match tokio::time::timeout(LEG_FILL_WAIT, handle.wait()).await {
                        Ok(outcome) => {
                            let filled = outcome.order.filled_size;
                            if filled > 0.0 {
                                let cost: f64 = if outcome.fills.is_empty() {
                                    filled * current_ask
                                } else {
                                    outcome.fills.iter().map(|f| f.size * f.price).sum()
                                };
                                total_shares += filled;
                                total_cost += cost;
                            }
                        }
                        Err(_) => {
                            warn!(child, "leg-1 child did not resolve in time");
                        }
                    }
                }
                Err(e) => warn!(child, "leg-1 child submission failed: {}", e),
            }

            if child + 1 < children {
                tokio::time::sleep(Duration::from_millis(self.cfg.order_interval_ms)).await;
            }
        }

        if total_shares > 0.0 {
            let avg_price = total_cost / total_shares;
            let now_ms = Utc::now().timestamp_millis();
            {
                let mut round_guard = self.round.lock();
                if let Some(round) = round_guard.as_mut() {
                    if round.phase == RoundPhase::Waiting {
                        round.leg1 = Some(LegFill {
                            side,
                            token_id,
                            shares: total_shares,
                            avg_price,
                            cost: total_cost,
                            order_ids,
                            filled_at_ms: Some(now_ms),
                        });
                        round.phase = RoundPhase::Leg1Filled;
                    }
                }
            }
            info!(
                %side, total_shares, avg_price,
                "leg 1 filled"
            );
            self.emit(DipArbEvent::Execution {
                leg: 1,
                success: true,
                shares: total_shares,
                avg_price,
                detail: format!("BUY {} {:.2} @ {:.4}", side, total_shares, avg_price),
            });
        } else {
            warn!(%side, "leg 1 execution produced no fills");
            self.emit(DipArbEvent::Execution {
                leg: 1,
                success: false,
                shares: 0.0,
                avg_price: 0.0,
                detail: format!("BUY {} failed", side),
            });
        }
    }

    /// Buy the opposite side with exactly the leg-1 share count, capped at
    /// the slippage-adjusted ask. FAK keeps the immediate-or-cancel
    /// semantics while pinning the size.
    async fn execute_leg2(self: &Arc<Self>, side: OutcomeSide, shares: f64, ask: f64) {
        let market = self.market.read().clone();
        let token_id = market.token_id(side).to_string();
        let price_cap = cent_grid(ask * (1.0 + self.cfg.max_slippage)).clamp(0.01, 0.99);

        let params = LimitOrderParams {
            token_id: token_id.clone(),
            side: Side::Buy,
            price: price_cap,
            size: shares,
            kind: OrderKind::FAK,
            expiration: None,
        };
        let meta = OrderMeta {
            kind: OrderKind::FAK,
            tag: Some("leg2".to_string()),
        };

        let outcome = match self.orders.create_order(params, Some(meta)).await {
            Ok(handle) => match tokio::time::timeout(LEG_FILL_WAIT, handle.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("leg-2 order did not resolve in time");
                    self.emit(DipArbEvent::Execution {
                        leg: 2,
                        success: false,
                        shares: 0.0,
                        avg_price: 0.0,
                        detail: "leg 2 timed out waiting for fills".to_string(),
                    });
                    return;
                }
            },
            Err(e) => {
                warn!("leg-2 submission failed: {}", e);
                self.emit(DipArbEvent::Execution {
                    leg: 2,
                    success: false,
                    shares: 0.0,
                    avg_price: 0.0,
                    detail: format!("leg 2 submission failed: {}", e),
                });
                return;
            }
        };

        let filled = outcome.order.filled_size;
        if filled <= 0.0 {
            self.emit(DipArbEvent::Execution {
                leg: 2,
                success: false,
                shares: 0.0,
                avg_price: 0.0,
                detail: format!("leg 2 unfilled ({:?})", outcome.status),
            });
            return;
        }

        let cost: f64 = if outcome.fills.is_empty() {
            filled * price_cap
        } else {
            outcome.fills.iter().map(|f| f.size * f.price).sum()
        };
        let avg_price = cost / filled;
        let now_ms = Utc::now().timestamp_millis();

        let (snapshot, mergeable) = {
            let mut round_guard = self.round.lock();
            let Some(round) = round_guard.as_mut() else {
                return;
            };
            let leg1_shares = round.leg1.as_ref().map(|l| l.shares).unwrap_or(0.0);
            let leg1_cost = round.leg1.as_ref().map(|l| l.avg_price).unwrap_or(0.0);
            round.leg2 = Some(LegFill {
                side,
                token_id,
                shares: filled,
                avg_price,
                cost,
                order_ids: if outcome.order.order_id.is_empty() {
                    Vec::new()
                } else {
                    vec![outcome.order.order_id.clone()]
                },
                filled_at_ms: Some(now_ms),
            });
            round.total_cost = Some(leg1_cost + avg_price);
            round.profit = Some(1.0 - (leg1_cost + avg_price));
            round.phase = RoundPhase::Completed;
            (round.clone(), leg1_shares.min(filled))
        };

        info!(%side, filled, avg_price, "leg 2 filled, round complete");
        self.emit(DipArbEvent::Execution {
            leg: 2,
            success: true,
            shares: filled,
            avg_price,
            detail: format!("BUY {} {:.2} @ {:.4}", side, filled, avg_price),
        });
        self.emit(DipArbEvent::RoundComplete {
            round: snapshot,
            exit: None,
        });

        if self.cfg.auto_merge && mergeable > 0.0 {
            match self
                .ctf
                .merge_pairs(&market.condition_id, mergeable)
                .await
            {
                Ok(receipt) => {
                    if let Some(round) = self.round.lock().as_mut() {
                        round.merged = true;
                    }
                    info!(amount = receipt.amount, "hedged pair merged");
                    self.emit(DipArbEvent::Settled {
                        condition_id: market.condition_id.clone(),
                        amount: receipt.amount,
                    });
                }
                Err(e) => {
                    warn!("auto-merge failed: {}", e);
                    self.emit(DipArbEvent::Error {
                        message: format!("auto-merge failed: {}", e),
                    });
                }
            }
        }
    }

    /// Sell the naked leg-1 position at market after a leg-2 timeout. An
    /// exit under the venue's $1 minimum is blocked; the position is held
    /// to resolution instead.
    async fn emergency_exit(self: &Arc<Self>, leg1: LegFill, bid: f64) {
        let notional = leg1.shares * bid;
        if bid <= 0.0 || notional < 1.0 {
            warn!(
                notional,
                "exit notional below venue minimum, holding position to resolution"
            );
            let snapshot = self.round.lock().clone();
            if let Some(round) = snapshot {
                self.emit(DipArbEvent::RoundComplete {
                    round,
                    exit: Some(ExitResult {
                        attempted: false,
                        success: false,
                        recovered: 0.0,
                        order_id: None,
                        reason: Some("exit notional below $1 minimum".to_string()),
                    }),
                });
            }
            return;
        }

        let price = cent_grid(bid * (1.0 - self.cfg.max_slippage)).clamp(0.01, 0.99);
        let params = LimitOrderParams {
            token_id: leg1.token_id.clone(),
            side: Side::Sell,
            price,
            size: leg1.shares,
            kind: OrderKind::FAK,
            expiration: None,
        };
        let meta = OrderMeta {
            kind: OrderKind::FAK,
            tag: Some("emergency_exit".to_string()),
        };

        let exit = match self.orders.create_order(params, Some(meta)).await {
            Ok(handle) => {
                let order_id = handle.order_id();
                match tokio::time::timeout(LEG_FILL_WAIT, handle.wait()).await {
                    Ok(outcome) => {
                        let recovered: f64 = outcome
                            .fills
                            .iter()
                            .map(|f| f.size * f.price)
                            .sum();
                        ExitResult {
                            attempted: true,
                            success: outcome.status == OutcomeStatus::Filled
                                || outcome.order.filled_size > 0.0,
                            recovered,
                            order_id,
                            reason: outcome.reason,
                        }
                    }
                    Err(_) => ExitResult {
                        attempted: true,
                        success: false,
                        recovered: 0.0,
                        order_id,
                        reason: Some("exit order did not resolve in time".to_string()),
                    },
                }
            }
            Err(e) => ExitResult {
                attempted: true,
                success: false,
                recovered: 0.0,
                order_id: None,
                reason: Some(e.to_string()),
            },
        };

        info!(
            success = exit.success,
            recovered = exit.recovered,
            "emergency exit finished"
        );
        let snapshot = self.round.lock().clone();
        if let Some(round) = snapshot {
            self.emit(DipArbEvent::RoundComplete {
                round,
                exit: Some(exit),
            });
        }
    }
}

/// Snap a price onto the venue's 0.01 grid.
fn cent_grid(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}
