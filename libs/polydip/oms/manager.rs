//! Order manager: composition root for validation, supervision, polling,
//! the user-channel feed, and settlement tracking.
//!
//! The manager exclusively owns the watched-order map. Events are applied
//! under its lock and fired into the broadcast stream after the lock is
//! released; orders reaching a terminal state are unwatched immediately.

use crate::bus::{RealtimeBus, Subscription, UserAuth, UserHandlers};
use crate::domain::OrderKind;
use crate::oms::events::OrderEvent;
use crate::oms::handle::{spawn_driver, CancelFn, OrderHandle};
use crate::oms::settlement::SettlementTracker;
use crate::oms::state::{OrderRecord, OrderState};
use crate::oms::validator::{validate_limit_order, validate_market_order};
use crate::oms::{OmsError, Result};
use crate::venue::{
    BatchResult, LimitOrderParams, MarketOrderParams, PlacementResponse, VenueApi,
    MAX_BATCH_ORDERS,
};
use crate::wire::{UserOrderMsg, UserTradeMsg};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How order supervision is fed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// User-channel WebSocket only
    Websocket,
    /// REST polling only
    Polling,
    /// Both; fills are deduplicated across sources
    Hybrid,
}

impl WatchMode {
    pub fn polls(&self) -> bool {
        matches!(self, WatchMode::Polling | WatchMode::Hybrid)
    }

    pub fn listens(&self) -> bool {
        matches!(self, WatchMode::Websocket | WatchMode::Hybrid)
    }
}

/// Manager configuration
#[derive(Debug, Clone)]
pub struct OrderManagerSettings {
    pub mode: WatchMode,
    pub polling_interval: Duration,
    /// Chain provider for settlement tracking; None disables it
    pub polygon_rpc_url: Option<String>,
    pub chain_id: u64,
}

impl Default for OrderManagerSettings {
    fn default() -> Self {
        Self {
            mode: WatchMode::Hybrid,
            polling_interval: Duration::from_secs(5),
            polygon_rpc_url: None,
            chain_id: 137,
        }
    }
}

/// Caller-supplied context attached to a watched order
#[derive(Debug, Clone, Default)]
pub struct OrderMeta {
    pub kind: OrderKind,
    pub tag: Option<String>,
}

/// A supervised order: authoritative state plus its poller
struct Watched {
    state: OrderState,
    #[allow(dead_code)]
    meta: OrderMeta,
    poller: Option<JoinHandle<()>>,
}

struct UserFeedBinding {
    bus: Arc<RealtimeBus>,
    auth: UserAuth,
    markets: Vec<String>,
    subscription: Option<Subscription>,
}

/// Broadcast capacity; handle drivers that lag get `Lagged` and continue
const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct OrderManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    venue: Arc<dyn VenueApi>,
    settings: OrderManagerSettings,
    watched: Mutex<HashMap<String, Watched>>,
    events_tx: broadcast::Sender<OrderEvent>,
    started: AtomicBool,
    settlement: Mutex<Option<SettlementTracker>>,
    /// Tick sizes fetched once per token
    tick_sizes: DashMap<String, f64>,
    user_feed: Mutex<Option<UserFeedBinding>>,
}

/// Adapter delivering user-channel events into the manager
struct UserFeed {
    inner: Weak<ManagerInner>,
}

impl UserHandlers for UserFeed {
    fn on_user_order(&self, msg: &UserOrderMsg, ts_ms: i64) {
        if let Some(inner) = self.inner.upgrade() {
            inner.ingest_user_order(msg, ts_ms);
        }
    }

    fn on_user_trade(&self, msg: &UserTradeMsg, ts_ms: i64) {
        if let Some(inner) = self.inner.upgrade() {
            inner.ingest_user_trade(msg, ts_ms);
        }
    }
}

impl OrderManager {
    pub fn new(venue: Arc<dyn VenueApi>, settings: OrderManagerSettings) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                venue,
                settings,
                watched: Mutex::new(HashMap::new()),
                events_tx,
                started: AtomicBool::new(false),
                settlement: Mutex::new(None),
                tick_sizes: DashMap::new(),
                user_feed: Mutex::new(None),
            }),
        }
    }

    /// Bind the bus and credentials used for the lazily-opened user channel.
    pub fn bind_user_feed(&self, bus: Arc<RealtimeBus>, auth: UserAuth, markets: Vec<String>) {
        *self.inner.user_feed.lock() = Some(UserFeedBinding {
            bus,
            auth,
            markets,
            subscription: None,
        });
    }

    /// Initialize the manager. Idempotent: calling twice is a no-op.
    pub fn start(&self) -> Result<()> {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("order manager already started");
            return Ok(());
        }

        if let Some(rpc_url) = &self.inner.settings.polygon_rpc_url {
            let tracker = SettlementTracker::new(rpc_url)?;
            *self.inner.settlement.lock() = Some(tracker);
            info!(chain_id = self.inner.settings.chain_id, "settlement tracking enabled");
        }

        info!(mode = ?self.inner.settings.mode, "order manager started");
        Ok(())
    }

    /// Subscribe to the lifecycle event stream.
    pub fn events(&self) -> broadcast::Receiver<OrderEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Validate, submit, and supervise a limit order.
    pub async fn create_order(
        &self,
        params: LimitOrderParams,
        meta: Option<OrderMeta>,
    ) -> Result<OrderHandle> {
        self.ensure_started()?;

        if let Err(reason) = validate_limit_order(&params) {
            let record = record_from_limit(&params, String::new());
            let reason = reason.to_string();
            self.inner.fire_events(vec![OrderEvent::Rejected {
                order: Some(record.clone()),
                reason: reason.clone(),
            }]);
            return Ok(OrderHandle::rejected_now(record, reason));
        }

        let rx = self.inner.events_tx.subscribe();
        let response = self.inner.venue.submit_limit_order(&params).await;
        let meta = meta.unwrap_or(OrderMeta {
            kind: params.kind,
            tag: None,
        });

        self.finish_submission(record_from_limit(&params, String::new()), response, meta, rx)
            .await
    }

    /// Validate, submit, and supervise a market (FOK/FAK) order.
    pub async fn create_market_order(
        &self,
        params: MarketOrderParams,
        meta: Option<OrderMeta>,
    ) -> Result<OrderHandle> {
        self.ensure_started()?;

        if let Err(reason) = validate_market_order(&params) {
            let record = record_from_market(&params, String::new());
            let reason = reason.to_string();
            self.inner.fire_events(vec![OrderEvent::Rejected {
                order: Some(record.clone()),
                reason: reason.clone(),
            }]);
            return Ok(OrderHandle::rejected_now(record, reason));
        }

        let rx = self.inner.events_tx.subscribe();
        let response = self.inner.venue.submit_market_order(&params).await;
        let meta = meta.unwrap_or(OrderMeta {
            kind: params.kind,
            tag: None,
        });

        self.finish_submission(record_from_market(&params, String::new()), response, meta, rx)
            .await
    }

    async fn finish_submission(
        &self,
        template: OrderRecord,
        response: crate::venue::Result<PlacementResponse>,
        meta: OrderMeta,
        rx: broadcast::Receiver<OrderEvent>,
    ) -> Result<OrderHandle> {
        match response {
            Ok(resp) if resp.success && resp.order_id.is_some() => {
                let order_id = resp.order_id.unwrap_or_default();
                let mut record = template;
                record.order_id = order_id.clone();
                record.updated_at_ms = Utc::now().timestamp_millis();

                self.inner.register_watch(record.clone(), meta);
                self.inner
                    .fire_events(vec![OrderEvent::Created { order: record }]);

                Ok(self.make_handle(order_id, rx))
            }
            Ok(resp) => {
                let reason = resp
                    .error_msg
                    .unwrap_or_else(|| "order rejected by venue".to_string());
                self.inner.fire_events(vec![OrderEvent::Rejected {
                    order: Some(template.clone()),
                    reason: reason.clone(),
                }]);
                Ok(OrderHandle::rejected_now(template, reason))
            }
            Err(e) => {
                let reason = e.to_string();
                self.inner.fire_events(vec![OrderEvent::Rejected {
                    order: Some(template.clone()),
                    reason: reason.clone(),
                }]);
                Ok(OrderHandle::rejected_now(template, reason))
            }
        }
    }

    /// Submit up to 15 limit orders in one REST batch; every accepted id is
    /// auto-watched. An oversized batch is rejected wholesale.
    pub async fn create_batch_orders(
        &self,
        orders: Vec<LimitOrderParams>,
    ) -> Result<BatchResult> {
        self.ensure_started()?;

        if orders.len() > MAX_BATCH_ORDERS {
            return Err(OmsError::BatchTooLarge(orders.len()));
        }

        let mut result = BatchResult::default();
        let mut valid = Vec::new();

        for params in orders {
            match validate_limit_order(&params) {
                Ok(()) => valid.push(params),
                Err(reason) => {
                    let record = record_from_limit(&params, String::new());
                    let reason = reason.to_string();
                    self.inner.fire_events(vec![OrderEvent::Rejected {
                        order: Some(record),
                        reason: reason.clone(),
                    }]);
                    result.failed.push((
                        params.token_id.clone(),
                        PlacementResponse {
                            success: false,
                            order_id: None,
                            status: None,
                            error_msg: Some(reason),
                        },
                    ));
                }
            }
        }

        if valid.is_empty() {
            return Ok(result);
        }

        let responses = self.inner.venue.submit_batch_orders(&valid).await?;
        for (params, resp) in valid.into_iter().zip(responses) {
            if resp.success && resp.order_id.is_some() {
                let order_id = resp.order_id.clone().unwrap_or_default();
                let mut record = record_from_limit(&params, order_id);
                record.updated_at_ms = Utc::now().timestamp_millis();
                self.inner.register_watch(
                    record.clone(),
                    OrderMeta {
                        kind: params.kind,
                        tag: None,
                    },
                );
                self.inner
                    .fire_events(vec![OrderEvent::Created { order: record }]);
                result.succeeded.push((params.token_id, resp));
            } else {
                let record = record_from_limit(&params, String::new());
                self.inner.fire_events(vec![OrderEvent::Rejected {
                    order: Some(record),
                    reason: resp
                        .error_msg
                        .clone()
                        .unwrap_or_else(|| "order rejected by venue".to_string()),
                }]);
                result.failed.push((params.token_id, resp));
            }
        }

        Ok(result)
    }

    /// Cancel an order. Returns true iff the venue confirmed; the order is
    /// unwatched immediately on confirmation.
    pub async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        self.inner.cancel_order(order_id).await
    }

    /// Supervise an existing order. Idempotent: watching a watched order is
    /// indistinguishable from a single watch.
    pub fn watch_order(&self, order_id: &str, meta: Option<OrderMeta>) {
        self.inner.register_watch(
            OrderRecord::unknown(order_id.to_string()),
            meta.unwrap_or_default(),
        );
    }

    /// Stop supervising an order without cancelling it.
    pub fn unwatch_order(&self, order_id: &str) {
        self.inner.unwatch(order_id);
    }

    /// Current snapshot of a watched order.
    pub fn get_watched(&self, order_id: &str) -> Option<OrderRecord> {
        self.inner
            .watched
            .lock()
            .get(order_id)
            .map(|w| w.state.order.clone())
    }

    /// Number of supervised orders.
    pub fn watched_count(&self) -> usize {
        self.inner.watched.lock().len()
    }

    /// Run one polling iteration for an order. The background pollers use
    /// the same path; exposed so tests and tools can drive deterministically.
    pub async fn poll_now(&self, order_id: &str) -> Result<()> {
        self.inner.poll_once(order_id).await;
        Ok(())
    }

    /// Ingest a user-channel order event (bus adapter path).
    pub fn ingest_user_order(&self, msg: &UserOrderMsg, ts_ms: i64) {
        self.inner.ingest_user_order(msg, ts_ms);
    }

    /// Ingest a user-channel trade event (bus adapter path).
    pub fn ingest_user_trade(&self, msg: &UserTradeMsg, ts_ms: i64) {
        self.inner.ingest_user_trade(msg, ts_ms);
    }

    /// Cached venue tick size for a token.
    pub async fn tick_size(&self, token_id: &str) -> Result<f64> {
        if let Some(tick) = self.inner.tick_sizes.get(token_id) {
            return Ok(*tick);
        }
        let tick = self.inner.venue.get_tick_size(token_id).await?;
        self.inner.tick_sizes.insert(token_id.to_string(), tick);
        Ok(tick)
    }

    fn ensure_started(&self) -> Result<()> {
        if !self.inner.started.load(Ordering::Acquire) {
            return Err(OmsError::NotStarted);
        }
        Ok(())
    }

    fn make_handle(&self, order_id: String, rx: broadcast::Receiver<OrderEvent>) -> OrderHandle {
        let weak = Arc::downgrade(&self.inner);
        let cancel_fn: CancelFn = Arc::new(move |id: &str| {
            if let Some(inner) = weak.upgrade() {
                let id = id.to_string();
                tokio::spawn(async move {
                    if let Err(e) = inner.cancel_order(&id).await {
                        warn!(order_id = %id, "cancel from handle failed: {}", e);
                    }
                });
            }
        });

        let (handle, shared, outcome_tx) = OrderHandle::pending(cancel_fn);
        *shared.order_id.write() = Some(order_id.clone());
        spawn_driver(shared, order_id, rx, outcome_tx);
        handle
    }
}

impl ManagerInner {
    /// Insert an order into the watched set and start its feeds. Idempotent.
    fn register_watch(self: &Arc<Self>, record: OrderRecord, meta: OrderMeta) {
        let order_id = record.order_id.clone();
        {
            let mut watched = self.watched.lock();
            if watched.contains_key(&order_id) {
                debug!(order_id = %order_id, "already watched");
                return;
            }
            watched.insert(
                order_id.clone(),
                Watched {
                    state: OrderState::new(record),
                    meta,
                    poller: None,
                },
            );
        }

        if self.settings.mode.polls() {
            self.start_poller(&order_id);
        }
        if self.settings.mode.listens() {
            self.ensure_user_feed();
        }
    }

    fn start_poller(self: &Arc<Self>, order_id: &str) {
        let inner = Arc::clone(self);
        let id = order_id.to_string();
        let interval = self.settings.polling_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !inner.poll_once(&id).await {
                    break;
                }
            }
        });

        if let Some(watched) = self.watched.lock().get_mut(order_id) {
            watched.poller = Some(handle);
        } else {
            // Order reached terminal state before the poller registered
            handle.abort();
        }
    }

    /// One polling iteration. Returns false once the order should no longer
    /// be polled.
    async fn poll_once(self: &Arc<Self>, order_id: &str) -> bool {
        let snapshot = match self.venue.get_order(order_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(order_id = %order_id, "poll failed: {}", e);
                return self.watched.lock().contains_key(order_id);
            }
        };

        let now_ms = Utc::now().timestamp_millis();
        let (events, terminal) = {
            let mut watched = self.watched.lock();
            match watched.get_mut(order_id) {
                Some(w) => {
                    let events = w.state.apply_poll(&snapshot, now_ms);
                    (events, w.state.order.status.is_terminal())
                }
                None => return false,
            }
        };

        self.fire_events(events);
        !terminal
    }

    fn ingest_user_order(self: &Arc<Self>, msg: &UserOrderMsg, ts_ms: i64) {
        let events = {
            let mut watched = self.watched.lock();
            match watched.get_mut(&msg.id) {
                Some(w) => w.state.apply_user_order(msg, ts_ms),
                None => {
                    debug!(order_id = %msg.id, "user order event for unwatched order");
                    return;
                }
            }
        };
        self.fire_events(events);
    }

    fn ingest_user_trade(self: &Arc<Self>, msg: &UserTradeMsg, ts_ms: i64) {
        // A single trade can touch several of our orders (taker plus any
        // maker orders), so route it to every watched parent.
        let mut targets: Vec<String> = Vec::new();
        {
            let watched = self.watched.lock();
            if let Some(taker) = &msg.taker_order_id {
                if watched.contains_key(taker) {
                    targets.push(taker.clone());
                }
            }
            for maker in &msg.maker_orders {
                if watched.contains_key(&maker.order_id) && !targets.contains(&maker.order_id) {
                    targets.push(maker.order_id.clone());
                }
            }
        }

        for order_id in targets {
            let events = {
                let mut watched = self.watched.lock();
                match watched.get_mut(&order_id) {
                    Some(w) => w.state.apply_user_trade(msg, ts_ms),
                    None => continue,
                }
            };
            self.fire_events(events);
        }
    }

    pub(crate) async fn cancel_order(self: &Arc<Self>, order_id: &str) -> Result<bool> {
        let confirmed = self.venue.cancel_order(order_id).await?;
        if confirmed {
            let now_ms = Utc::now().timestamp_millis();
            let events = {
                let mut watched = self.watched.lock();
                match watched.get_mut(order_id) {
                    Some(w) => w.state.force_cancel(now_ms),
                    None => Vec::new(),
                }
            };
            self.fire_events(events);
        }
        Ok(confirmed)
    }

    /// Broadcast events and run their side effects: settlement waits for
    /// submitted transactions, immediate unwatch on terminal states. Must
    /// be called without the watched lock held.
    pub(crate) fn fire_events(self: &Arc<Self>, events: Vec<OrderEvent>) {
        for event in events {
            if let OrderEvent::TransactionSubmitted {
                order_id,
                trade_id,
                tx_hash,
            } = &event
            {
                if let Some(tracker) = &*self.settlement.lock() {
                    tracker.spawn_confirmation_wait(
                        order_id.clone(),
                        trade_id.clone(),
                        tx_hash.clone(),
                        self.events_tx.clone(),
                    );
                }
            }

            let terminal_id = if event.is_terminal() {
                event.order_id().map(str::to_string)
            } else {
                None
            };

            let _ = self.events_tx.send(event);

            if let Some(order_id) = terminal_id {
                self.unwatch(&order_id);
            }
        }
    }

    fn unwatch(self: &Arc<Self>, order_id: &str) {
        if let Some(watched) = self.watched.lock().remove(order_id) {
            if let Some(poller) = watched.poller {
                poller.abort();
            }
            debug!(order_id = %order_id, "unwatched");
        }
    }

    /// Open the user-channel subscription on first use.
    fn ensure_user_feed(self: &Arc<Self>) {
        let mut binding = self.user_feed.lock();
        let Some(binding) = binding.as_mut() else {
            return;
        };
        if binding.subscription.is_some() {
            return;
        }

        let adapter = Arc::new(UserFeed {
            inner: Arc::downgrade(self),
        });
        match binding.bus.subscribe_user(
            binding.auth.clone(),
            binding.markets.clone(),
            adapter,
        ) {
            Ok(sub) => {
                info!("user-channel subscription opened");
                binding.subscription = Some(sub);
            }
            Err(e) => warn!("failed to open user channel: {}", e),
        }
    }
}

fn record_from_limit(params: &LimitOrderParams, order_id: String) -> OrderRecord {
    OrderRecord::new(
        order_id,
        params.token_id.clone(),
        params.side,
        params.price,
        params.size,
        params.kind,
        params.expiration,
    )
}

fn record_from_market(params: &MarketOrderParams, order_id: String) -> OrderRecord {
    OrderRecord::new(
        order_id,
        params.token_id.clone(),
        params.side,
        0.0,
        params.amount,
        params.kind,
        None,
    )
}
