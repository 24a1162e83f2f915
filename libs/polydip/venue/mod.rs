//! REST capability boundary.
//!
//! The engine consumes the venue's order/market API through [`VenueApi`];
//! the concrete HTTP client (signing, rate limiting, retries) lives outside
//! this crate. Tests implement the trait with in-memory mocks.

use crate::domain::{MarketDescriptor, MarketDuration, OrderKind, OrderStatus, Side, Underlying};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum orders accepted in one batch submission
pub const MAX_BATCH_ORDERS: usize = 15;

#[derive(Error, Debug)]
pub enum VenueError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("order rejected by venue: {0}")]
    Rejected(String),

    #[error("rate limited")]
    RateLimited,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("batch too large: {0} orders (max {MAX_BATCH_ORDERS})")]
    BatchTooLarge(usize),

    #[error("venue error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VenueError>;

// =============================================================================
// Request / Response Types
// =============================================================================

/// Parameters for a limit order (GTC/GTD, or FAK with a price cap)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitOrderParams {
    pub token_id: String,
    pub side: Side,
    /// Price per share in [0, 1]
    pub price: f64,
    /// Number of shares
    pub size: f64,
    pub kind: OrderKind,
    /// GTD only: expiration, epoch seconds
    #[serde(default)]
    pub expiration: Option<i64>,
}

/// Parameters for a market order (FOK/FAK), sized in quote currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOrderParams {
    pub token_id: String,
    pub side: Side,
    /// Quote-currency amount to spend (BUY) or shares to sell (SELL)
    pub amount: f64,
    pub kind: OrderKind,
}

/// Venue response to a single order submission
#[derive(Debug, Clone, Default)]
pub struct PlacementResponse {
    pub success: bool,
    pub order_id: Option<String>,
    pub status: Option<String>,
    pub error_msg: Option<String>,
}

/// Order snapshot as returned by the venue's order endpoint
#[derive(Debug, Clone)]
pub struct RestOrder {
    pub order_id: String,
    pub token_id: String,
    pub side: Side,
    pub price: f64,
    pub original_size: f64,
    pub size_matched: f64,
    pub remaining_size: f64,
    pub status: OrderStatus,
    pub kind: OrderKind,
    pub expiration: Option<i64>,
    pub associate_trades: Vec<String>,
}

/// Filter for upcoming-market scans
///
/// `min_minutes_until_end` may be negative: the rotation recovery scan uses
/// a look-back window to find recently ended markets. Implementations clamp
/// to whatever the upstream API accepts; callers filter by end time
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct MarketScanFilter {
    pub underlyings: Vec<Underlying>,
    pub duration: Option<MarketDuration>,
    pub min_minutes_until_end: i64,
}

/// Market resolution state
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub resolved: bool,
    pub winning_token_id: Option<String>,
}

/// Result of a batch order placement with partitioned success/failure
/// responses.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub succeeded: Vec<(String, PlacementResponse)>,
    pub failed: Vec<(String, PlacementResponse)>,
}

impl BatchResult {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn any_failed(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn order_ids(&self) -> Vec<String> {
        self.succeeded
            .iter()
            .filter_map(|(_, r)| r.order_id.clone())
            .collect()
    }

    pub fn error_messages(&self) -> Vec<(String, String)> {
        self.failed
            .iter()
            .map(|(token_id, r)| {
                (
                    token_id.clone(),
                    r.error_msg
                        .clone()
                        .unwrap_or_else(|| "Unknown error".to_string()),
                )
            })
            .collect()
    }
}

// =============================================================================
// Capability Trait
// =============================================================================

/// The venue REST surface the engine depends on.
#[async_trait]
pub trait VenueApi: Send + Sync {
    async fn submit_limit_order(&self, params: &LimitOrderParams) -> Result<PlacementResponse>;

    async fn submit_market_order(&self, params: &MarketOrderParams) -> Result<PlacementResponse>;

    /// Submit up to [`MAX_BATCH_ORDERS`] orders in one call. Responses are
    /// positional.
    async fn submit_batch_orders(
        &self,
        params: &[LimitOrderParams],
    ) -> Result<Vec<PlacementResponse>>;

    /// Returns true iff the venue confirmed the cancellation.
    async fn cancel_order(&self, order_id: &str) -> Result<bool>;

    async fn get_order(&self, order_id: &str) -> Result<RestOrder>;

    async fn get_tick_size(&self, token_id: &str) -> Result<f64>;

    async fn get_neg_risk_flag(&self, token_id: &str) -> Result<bool>;

    async fn get_market_resolution(&self, condition_id: &str) -> Result<Resolution>;

    async fn scan_upcoming_markets(
        &self,
        filter: &MarketScanFilter,
    ) -> Result<Vec<MarketDescriptor>>;
}
