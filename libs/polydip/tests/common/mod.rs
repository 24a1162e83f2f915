//! Shared mocks: an in-memory venue and a recording CTF client.

// Not every test binary exercises every mock
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use polydip::ctf::{CtfClient, CtfReceipt, Result as CtfResult};
use polydip::domain::{MarketDescriptor, OrderStatus};
use polydip::venue::{
    LimitOrderParams, MarketOrderParams, MarketScanFilter, PlacementResponse, Resolution,
    RestOrder, Result as VenueResult, VenueApi, VenueError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// In-memory venue. Orders are stored as [`RestOrder`]s that tests (or the
/// auto-fill switches) mutate; the manager's pollers observe the mutations.
pub struct MockVenue {
    orders: Mutex<HashMap<String, RestOrder>>,
    next_id: AtomicU64,
    /// Token ids of every submission, in order
    pub submissions: Mutex<Vec<String>>,
    /// Immediately fill market orders at `fill_price`
    pub auto_fill_market: AtomicBool,
    /// Immediately fill limit orders at their limit price
    pub auto_fill_limit: AtomicBool,
    pub fill_price: Mutex<f64>,
    pub cancel_confirms: AtomicBool,
    pub scan_results: Mutex<Vec<MarketDescriptor>>,
    pub resolutions: Mutex<HashMap<String, Resolution>>,
}

impl MockVenue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            submissions: Mutex::new(Vec::new()),
            auto_fill_market: AtomicBool::new(false),
            auto_fill_limit: AtomicBool::new(false),
            fill_price: Mutex::new(0.5),
            cancel_confirms: AtomicBool::new(true),
            scan_results: Mutex::new(Vec::new()),
            resolutions: Mutex::new(HashMap::new()),
        })
    }

    fn fresh_id(&self) -> String {
        format!("order-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Mutate a stored order; the next poll observes the change.
    pub fn update<F: FnOnce(&mut RestOrder)>(&self, order_id: &str, f: F) {
        let mut orders = self.orders.lock();
        if let Some(order) = orders.get_mut(order_id) {
            f(order);
        }
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }
}

#[async_trait]
impl VenueApi for MockVenue {
    async fn submit_limit_order(&self, params: &LimitOrderParams) -> VenueResult<PlacementResponse> {
        let order_id = self.fresh_id();
        self.submissions.lock().push(params.token_id.clone());

        let filled = self.auto_fill_limit.load(Ordering::Relaxed);
        let order = RestOrder {
            order_id: order_id.clone(),
            token_id: params.token_id.clone(),
            side: params.side,
            price: params.price,
            original_size: params.size,
            size_matched: if filled { params.size } else { 0.0 },
            remaining_size: if filled { 0.0 } else { params.size },
            status: if filled {
                OrderStatus::Filled
            } else {
                OrderStatus::Open
            },
            kind: params.kind,
            expiration: params.expiration,
            associate_trades: Vec::new(),
        };
        self.orders.lock().insert(order_id.clone(), order);

        Ok(PlacementResponse {
            success: true,
            order_id: Some(order_id),
            status: Some("live".to_string()),
            error_msg: None,
        })
    }

    async fn submit_market_order(
        &self,
        params: &MarketOrderParams,
    ) -> VenueResult<PlacementResponse> {
        let order_id = self.fresh_id();
        self.submissions.lock().push(params.token_id.clone());

        let fill_price = *self.fill_price.lock();
        let filled = self.auto_fill_market.load(Ordering::Relaxed);
        let shares = params.amount / fill_price;
        let order = RestOrder {
            order_id: order_id.clone(),
            token_id: params.token_id.clone(),
            side: params.side,
            price: fill_price,
            original_size: params.amount,
            size_matched: if filled { shares } else { 0.0 },
            remaining_size: if filled { 0.0 } else { params.amount },
            status: if filled {
                OrderStatus::Filled
            } else {
                OrderStatus::Open
            },
            kind: params.kind,
            expiration: None,
            associate_trades: Vec::new(),
        };
        self.orders.lock().insert(order_id.clone(), order);

        Ok(PlacementResponse {
            success: true,
            order_id: Some(order_id),
            status: Some("matched".to_string()),
            error_msg: None,
        })
    }

    async fn submit_batch_orders(
        &self,
        params: &[LimitOrderParams],
    ) -> VenueResult<Vec<PlacementResponse>> {
        let mut responses = Vec::new();
        for p in params {
            responses.push(self.submit_limit_order(p).await?);
        }
        Ok(responses)
    }

    async fn cancel_order(&self, order_id: &str) -> VenueResult<bool> {
        if !self.cancel_confirms.load(Ordering::Relaxed) {
            return Ok(false);
        }
        self.update(order_id, |o| o.status = OrderStatus::Cancelled);
        Ok(true)
    }

    async fn get_order(&self, order_id: &str) -> VenueResult<RestOrder> {
        self.orders
            .lock()
            .get(order_id)
            .cloned()
            .ok_or_else(|| VenueError::NotFound(order_id.to_string()))
    }

    async fn get_tick_size(&self, _token_id: &str) -> VenueResult<f64> {
        Ok(0.01)
    }

    async fn get_neg_risk_flag(&self, _token_id: &str) -> VenueResult<bool> {
        Ok(false)
    }

    async fn get_market_resolution(&self, condition_id: &str) -> VenueResult<Resolution> {
        Ok(self
            .resolutions
            .lock()
            .get(condition_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn scan_upcoming_markets(
        &self,
        _filter: &MarketScanFilter,
    ) -> VenueResult<Vec<MarketDescriptor>> {
        Ok(self.scan_results.lock().clone())
    }
}

/// Recording CTF client.
pub struct MockCtf {
    pub balances: Mutex<HashMap<String, f64>>,
    pub resolutions: Mutex<HashMap<String, Resolution>>,
    pub merges: Mutex<Vec<(String, f64)>>,
    pub redeems: Mutex<Vec<String>>,
    /// When set, redeem calls fail with this message
    pub redeem_error: Mutex<Option<String>>,
}

impl MockCtf {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            balances: Mutex::new(HashMap::new()),
            resolutions: Mutex::new(HashMap::new()),
            merges: Mutex::new(Vec::new()),
            redeems: Mutex::new(Vec::new()),
            redeem_error: Mutex::new(None),
        })
    }

    pub fn set_balance(&self, token_id: &str, amount: f64) {
        self.balances.lock().insert(token_id.to_string(), amount);
    }

    pub fn set_resolution(&self, condition_id: &str, resolution: Resolution) {
        self.resolutions
            .lock()
            .insert(condition_id.to_string(), resolution);
    }
}

#[async_trait]
impl CtfClient for MockCtf {
    async fn merge_pairs(&self, condition_id: &str, amount: f64) -> CtfResult<CtfReceipt> {
        self.merges.lock().push((condition_id.to_string(), amount));
        Ok(CtfReceipt {
            amount,
            tx_hash: Some("0xmerge".to_string()),
        })
    }

    async fn redeem_by_token_ids(
        &self,
        condition_id: &str,
        token_ids: (&str, &str),
    ) -> CtfResult<CtfReceipt> {
        if let Some(message) = self.redeem_error.lock().clone() {
            return Err(polydip::ctf::CtfError::TransactionFailed(message));
        }
        self.redeems.lock().push(condition_id.to_string());
        let balances = self.balances.lock();
        let amount = balances.get(token_ids.0).copied().unwrap_or(0.0)
            + balances.get(token_ids.1).copied().unwrap_or(0.0);
        Ok(CtfReceipt {
            amount,
            tx_hash: Some("0xredeem".to_string()),
        })
    }

    async fn get_position_balance(&self, token_id: &str) -> CtfResult<f64> {
        Ok(self.balances.lock().get(token_id).copied().unwrap_or(0.0))
    }

    async fn get_market_resolution(&self, condition_id: &str) -> CtfResult<Resolution> {
        Ok(self
            .resolutions
            .lock()
            .get(condition_id)
            .cloned()
            .unwrap_or_default())
    }

    fn address(&self) -> String {
        "0x00000000000000000000000000000000deadbeef".to_string()
    }
}
