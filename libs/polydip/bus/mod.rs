//! Realtime fan-out bus.
//!
//! Owns one livesock connection per endpoint (market, user), demuxes every
//! inbound frame, and delivers typed events to per-subscription handler
//! tables. Subscription frames are registered as replay frames on the
//! client, so every reconnect re-issues them as initial subscriptions and
//! the server replays current book snapshots.
//!
//! Delivery runs on the connection's read task: events with the same
//! (topic, kind, asset id) arrive at handlers in wire order.

use crate::domain::Underlying;
use crate::wire::{
    demux, BestBidAsk, BookSnapshot, LastTrade, MarketResolved, MarketSubscription, NewMarket,
    PriceChange, RtPayload, SubscriptionOp, TickSizeChange, UserOrderMsg, UserSubscription,
    UserTradeMsg,
};
use livesock::{ClientConfig, FrameSink, LivesockError, WsClient};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum BusError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("socket error: {0}")]
    Socket(#[from] LivesockError),
}

pub type Result<T> = std::result::Result<T, BusError>;

// =============================================================================
// Handler surfaces
// =============================================================================

/// Market-channel handlers. All methods default to no-ops; implement what
/// you consume. Handlers run on the delivery task and must not block.
pub trait MarketHandlers: Send + Sync {
    fn on_orderbook(&self, _book: &BookSnapshot, _ts_ms: i64) {}
    fn on_price_change(&self, _change: &PriceChange, _ts_ms: i64) {}
    fn on_last_trade(&self, _trade: &LastTrade, _ts_ms: i64) {}
    fn on_tick_size_change(&self, _change: &TickSizeChange, _ts_ms: i64) {}
    fn on_best_bid_ask(&self, _bba: &BestBidAsk, _ts_ms: i64) {}
    fn on_market_resolved(&self, _resolved: &MarketResolved, _ts_ms: i64) {}
    fn on_new_market(&self, _market: &NewMarket, _ts_ms: i64) {}
    fn on_underlying_price(&self, _underlying: Underlying, _price: f64, _ts_ms: i64) {}
}

/// User-channel handlers.
pub trait UserHandlers: Send + Sync {
    fn on_user_order(&self, _msg: &UserOrderMsg, _ts_ms: i64) {}
    fn on_user_trade(&self, _msg: &UserTradeMsg, _ts_ms: i64) {}
}

/// Credentials tuple for the user channel
#[derive(Debug, Clone)]
pub struct UserAuth {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

// =============================================================================
// Bus
// =============================================================================

/// Endpoint URLs
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub market_url: String,
    pub user_url: String,
}

struct MarketSub {
    assets: HashSet<String>,
    handlers: Arc<dyn MarketHandlers>,
    replay_frame: String,
}

struct UserSub {
    handlers: Arc<dyn UserHandlers>,
    replay_frame: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Market,
    User,
}

/// Cancellation capability handed to subscribers.
pub struct Subscription {
    id: u64,
    endpoint: Endpoint,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove this subscription from the bus; market subscriptions emit the
    /// dynamic unsubscribe frame.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.remove_subscription(self.id, self.endpoint);
        }
    }
}

pub struct RealtimeBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    config: BusConfig,
    market_client: Mutex<Option<Arc<WsClient>>>,
    user_client: Mutex<Option<Arc<WsClient>>>,
    market_subs: RwLock<HashMap<u64, MarketSub>>,
    user_subs: RwLock<HashMap<u64, UserSub>>,
    next_id: AtomicU64,
    /// First market subscription uses the initial frame form
    market_initialized: AtomicBool,
}

struct MarketSink {
    inner: Weak<BusInner>,
}

impl FrameSink for MarketSink {
    fn on_frame(&self, text: &str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                debug!("non-JSON market frame: {}", text);
                return;
            }
        };
        for event in demux(&value) {
            inner.dispatch_market(event.timestamp_ms, &event.payload);
        }
    }
}

struct UserSink {
    inner: Weak<BusInner>,
}

impl FrameSink for UserSink {
    fn on_frame(&self, text: &str) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(_) => {
                debug!("non-JSON user frame: {}", text);
                return;
            }
        };
        for event in demux(&value) {
            inner.dispatch_user(event.timestamp_ms, &event.payload);
        }
    }
}

impl RealtimeBus {
    pub fn new(config: BusConfig) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(BusInner {
                config,
                market_client: Mutex::new(None),
                user_client: Mutex::new(None),
                market_subs: RwLock::new(HashMap::new()),
                user_subs: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                market_initialized: AtomicBool::new(false),
            }),
        })
    }

    /// Subscribe to market events for a set of asset ids.
    ///
    /// The first subscription emits the initial `{"type":"MARKET"}` frame;
    /// later ones use the dynamic subscribe operation. Both register a
    /// replay frame so reconnects resubscribe automatically.
    pub fn subscribe_market(
        &self,
        asset_ids: Vec<String>,
        handlers: Arc<dyn MarketHandlers>,
    ) -> Result<Subscription> {
        let client = self.inner.ensure_market_client();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let replay_frame = serde_json::to_string(&MarketSubscription::new(asset_ids.clone()))?;
        client.register_replay_frame(replay_frame.clone());

        let live_frame = if self
            .inner
            .market_initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            replay_frame.clone()
        } else {
            serde_json::to_string(&SubscriptionOp::subscribe(asset_ids.clone()))?
        };
        client.send(live_frame)?;

        self.inner.market_subs.write().insert(
            id,
            MarketSub {
                assets: asset_ids.into_iter().collect(),
                handlers,
                replay_frame,
            },
        );

        debug!(subscription = id, "market subscription added");
        Ok(Subscription {
            id,
            endpoint: Endpoint::Market,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Subscribe to the authenticated user channel.
    pub fn subscribe_user(
        &self,
        auth: UserAuth,
        markets: Vec<String>,
        handlers: Arc<dyn UserHandlers>,
    ) -> Result<Subscription> {
        let client = self.inner.ensure_user_client();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let frame = serde_json::to_string(&UserSubscription::new(
            auth.api_key,
            auth.secret,
            auth.passphrase,
            markets,
        ))?;
        client.register_replay_frame(frame.clone());
        client.send(frame.clone())?;

        self.inner.user_subs.write().insert(
            id,
            UserSub {
                handlers,
                replay_frame: frame,
            },
        );

        debug!(subscription = id, "user subscription added");
        Ok(Subscription {
            id,
            endpoint: Endpoint::User,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Feed an underlying-asset price into every market subscription.
    /// Called by the oracle feed.
    pub fn publish_underlying_price(&self, underlying: Underlying, price: f64, ts_ms: i64) {
        let handlers: Vec<Arc<dyn MarketHandlers>> = self
            .inner
            .market_subs
            .read()
            .values()
            .map(|s| Arc::clone(&s.handlers))
            .collect();
        for h in handlers {
            h.on_underlying_price(underlying, price, ts_ms);
        }
    }

    /// Forcibly close both connections. Subscriptions stay registered, so a
    /// later reconnect would resubscribe; use for shutdown.
    pub fn disconnect(&self) {
        if let Some(client) = &*self.inner.market_client.lock() {
            client.disconnect();
        }
        if let Some(client) = &*self.inner.user_client.lock() {
            client.disconnect();
        }
        info!("bus disconnected");
    }

    /// Number of active market subscriptions (diagnostics).
    pub fn market_subscription_count(&self) -> usize {
        self.inner.market_subs.read().len()
    }
}

impl BusInner {
    fn ensure_market_client(self: &Arc<Self>) -> Arc<WsClient> {
        let mut slot = self.market_client.lock();
        if let Some(client) = &*slot {
            return Arc::clone(client);
        }
        let sink = Arc::new(MarketSink {
            inner: Arc::downgrade(self),
        });
        let client = Arc::new(WsClient::new(
            ClientConfig::new(self.config.market_url.clone()),
            sink,
        ));
        client.connect();
        info!(url = %self.config.market_url, "market connection started");
        *slot = Some(Arc::clone(&client));
        client
    }

    fn ensure_user_client(self: &Arc<Self>) -> Arc<WsClient> {
        let mut slot = self.user_client.lock();
        if let Some(client) = &*slot {
            return Arc::clone(client);
        }
        let sink = Arc::new(UserSink {
            inner: Arc::downgrade(self),
        });
        let client = Arc::new(WsClient::new(
            ClientConfig::new(self.config.user_url.clone()),
            sink,
        ));
        client.connect();
        info!(url = %self.config.user_url, "user connection started");
        *slot = Some(Arc::clone(&client));
        client
    }

    /// Handlers interested in an asset, cloned out of the lock so handler
    /// code can re-enter the bus.
    fn market_handlers_for(&self, asset_id: &str) -> Vec<Arc<dyn MarketHandlers>> {
        self.market_subs
            .read()
            .values()
            .filter(|s| asset_id.is_empty() || s.assets.contains(asset_id))
            .map(|s| Arc::clone(&s.handlers))
            .collect()
    }

    fn all_market_handlers(&self) -> Vec<Arc<dyn MarketHandlers>> {
        self.market_subs
            .read()
            .values()
            .map(|s| Arc::clone(&s.handlers))
            .collect()
    }

    fn dispatch_market(&self, ts_ms: i64, payload: &RtPayload) {
        match payload {
            RtPayload::Book(book) => {
                for h in self.market_handlers_for(&book.asset_id) {
                    h.on_orderbook(book, ts_ms);
                }
            }
            RtPayload::PriceChange(change) => {
                for h in self.market_handlers_for(&change.asset_id) {
                    h.on_price_change(change, ts_ms);
                }
            }
            RtPayload::LastTrade(trade) => {
                for h in self.market_handlers_for(&trade.asset_id) {
                    h.on_last_trade(trade, ts_ms);
                }
            }
            RtPayload::TickSizeChange(change) => {
                for h in self.market_handlers_for(&change.asset_id) {
                    h.on_tick_size_change(change, ts_ms);
                }
            }
            RtPayload::BestBidAsk(bba) => {
                for h in self.market_handlers_for(&bba.asset_id) {
                    h.on_best_bid_ask(bba, ts_ms);
                }
            }
            // No asset id on these; every subscription hears them
            RtPayload::MarketResolved(resolved) => {
                for h in self.all_market_handlers() {
                    h.on_market_resolved(resolved, ts_ms);
                }
            }
            RtPayload::NewMarket(market) => {
                for h in self.all_market_handlers() {
                    h.on_new_market(market, ts_ms);
                }
            }
            RtPayload::UserOrder(_) | RtPayload::UserTrade(_) => {
                debug!("user event on market connection, dropping");
            }
        }
    }

    fn dispatch_user(&self, ts_ms: i64, payload: &RtPayload) {
        let handlers: Vec<Arc<dyn UserHandlers>> = self
            .user_subs
            .read()
            .values()
            .map(|s| Arc::clone(&s.handlers))
            .collect();

        match payload {
            RtPayload::UserOrder(msg) => {
                for h in &handlers {
                    h.on_user_order(msg, ts_ms);
                }
            }
            RtPayload::UserTrade(msg) => {
                for h in &handlers {
                    h.on_user_trade(msg, ts_ms);
                }
            }
            _ => {
                debug!("market event on user connection, dropping");
            }
        }
    }

    fn remove_subscription(self: &Arc<Self>, id: u64, endpoint: Endpoint) {
        match endpoint {
            Endpoint::Market => {
                let removed = self.market_subs.write().remove(&id);
                if let Some(sub) = removed {
                    if let Some(client) = &*self.market_client.lock() {
                        client.unregister_replay_frame(&sub.replay_frame);
                        let assets: Vec<String> = sub.assets.into_iter().collect();
                        match serde_json::to_string(&SubscriptionOp::unsubscribe(assets)) {
                            Ok(frame) => {
                                if let Err(e) = client.send(frame) {
                                    warn!("failed to send unsubscribe: {}", e);
                                }
                            }
                            Err(e) => warn!("failed to serialize unsubscribe: {}", e),
                        }
                    }
                    debug!(subscription = id, "market subscription removed");
                }
            }
            Endpoint::User => {
                let removed = self.user_subs.write().remove(&id);
                if let Some(sub) = removed {
                    if let Some(client) = &*self.user_client.lock() {
                        client.unregister_replay_frame(&sub.replay_frame);
                    }
                    debug!(subscription = id, "user subscription removed");
                }
            }
        }
    }
}
