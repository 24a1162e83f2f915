//! Event demultiplexer for the venue's untagged message union.
//!
//! The wire protocol does not tag every message with a type field, so frames
//! are classified by field shape. The matcher below is ordered; the first
//! matching rule wins. Keep the rule order in `demux` aligned with the
//! variant definitions here.

use crate::domain::PriceLevel;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

// =============================================================================
// Tagged Events
// =============================================================================

/// Which channel an event logically belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Market,
    User,
}

/// A classified event with a normalized timestamp
#[derive(Debug, Clone)]
pub struct RtEvent {
    pub topic: Topic,
    /// Stable kind tag, e.g. "book", "price_change", "order", "trade"
    pub kind: &'static str,
    /// Event time, epoch milliseconds
    pub timestamp_ms: i64,
    pub payload: RtPayload,
}

/// Typed payloads for every event kind
#[derive(Debug, Clone)]
pub enum RtPayload {
    Book(BookSnapshot),
    PriceChange(PriceChange),
    LastTrade(LastTrade),
    TickSizeChange(TickSizeChange),
    BestBidAsk(BestBidAsk),
    MarketResolved(MarketResolved),
    NewMarket(NewMarket),
    UserOrder(UserOrderMsg),
    UserTrade(UserTradeMsg),
}

// =============================================================================
// Market payloads
// =============================================================================

/// Full book snapshot for one asset
///
/// Bids arrive sorted descending, asks ascending.
#[derive(Debug, Clone, Deserialize)]
pub struct BookSnapshot {
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub tick_size: Option<String>,
    #[serde(default)]
    pub min_order_size: Option<String>,
}

/// A single level change, flattened out of the wire's `price_changes` array
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChange {
    /// Copied from the parent frame during fan-out
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub best_bid: Option<String>,
    #[serde(default)]
    pub best_ask: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

/// Last traded price for an asset
#[derive(Debug, Clone, Deserialize)]
pub struct LastTrade {
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub fee_rate_bps: Option<String>,
}

/// Tick size mutation for an asset
#[derive(Debug, Clone, Deserialize)]
pub struct TickSizeChange {
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub old_tick_size: String,
    #[serde(default)]
    pub new_tick_size: String,
}

/// Top-of-book summary
#[derive(Debug, Clone, Deserialize)]
pub struct BestBidAsk {
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub best_bid: String,
    #[serde(default)]
    pub best_ask: String,
    #[serde(default)]
    pub spread: String,
}

/// Market resolution announcement
///
/// Carries market-creation fields too, so it must be classified before
/// `NewMarket`.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketResolved {
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub winning_asset_id: Option<String>,
    #[serde(default)]
    pub winning_outcome: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

/// New market announcement
#[derive(Debug, Clone, Deserialize)]
pub struct NewMarket {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub assets_ids: Vec<String>,
    #[serde(default)]
    pub outcomes: Vec<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

// =============================================================================
// User payloads
// =============================================================================

/// User-channel order lifecycle message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOrderKind {
    Placement,
    Update,
    Cancellation,
}

/// Order event from the user channel
#[derive(Debug, Clone, Deserialize)]
pub struct UserOrderMsg {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub original_size: String,
    #[serde(default)]
    pub size_matched: String,
    #[serde(default)]
    pub associate_trades: Vec<String>,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub expiration: Option<String>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// PLACEMENT, UPDATE, or CANCELLATION
    #[serde(rename = "type", default)]
    pub msg_type: String,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

impl UserOrderMsg {
    /// Parse the lifecycle kind; unknown kinds are treated as updates
    pub fn order_kind(&self) -> UserOrderKind {
        match self.msg_type.as_str() {
            "PLACEMENT" => UserOrderKind::Placement,
            "CANCELLATION" => UserOrderKind::Cancellation,
            _ => UserOrderKind::Update,
        }
    }
}

/// Maker order details within a trade
#[derive(Debug, Clone, Deserialize)]
pub struct MakerOrderMsg {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub matched_amount: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub side: Option<String>,
}

/// Trade event from the user channel
#[derive(Debug, Clone, Deserialize)]
pub struct UserTradeMsg {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub asset_id: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub size: String,
    /// MATCHED, MINED, CONFIRMED, RETRYING, FAILED
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub taker_order_id: Option<String>,
    #[serde(default)]
    pub maker_orders: Vec<MakerOrderMsg>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

// =============================================================================
// Timestamp normalization
// =============================================================================

/// Normalize a raw epoch value to milliseconds.
/// Anything below 10^12 is treated as seconds.
fn normalize_epoch_ms(raw: f64) -> i64 {
    if raw < 1_000_000_000_000.0 {
        (raw * 1000.0) as i64
    } else {
        raw as i64
    }
}

fn timestamp_from_value(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_f64().map(normalize_epoch_ms),
        Value::String(s) => s.parse::<f64>().ok().map(normalize_epoch_ms),
        _ => None,
    }
}

/// Extract and normalize the frame's timestamp; missing or unparseable
/// timestamps default to the local clock.
fn extract_timestamp_ms(value: &Value) -> i64 {
    value
        .get("timestamp")
        .and_then(timestamp_from_value)
        .unwrap_or_else(|| Utc::now().timestamp_millis())
}

// =============================================================================
// Demultiplexer
// =============================================================================

fn has(value: &Value, key: &str) -> bool {
    value.get(key).map(|v| !v.is_null()).unwrap_or(false)
}

fn event_type_is(value: &Value, expected: &str) -> bool {
    value
        .get("event_type")
        .and_then(|v| v.as_str())
        .map(|s| s == expected)
        .unwrap_or(false)
}

/// Classify one decoded frame into zero or more tagged events.
///
/// Rules are evaluated in order; the first match wins:
/// 1. array of book objects, 2. user trade, 3. user order,
/// 4. price_change fan-out, 5. last_trade_price, 6. tick_size_change,
/// 7. best_bid_ask, 8. market_resolved, 9. new_market, 10. single book,
/// 11. drop.
pub fn demux(value: &Value) -> Vec<RtEvent> {
    // Rule 1: top-level array whose elements carry bids or asks
    if let Some(items) = value.as_array() {
        if items.iter().any(|e| has(e, "bids") || has(e, "asks")) {
            return items
                .iter()
                .filter(|e| has(e, "bids") || has(e, "asks"))
                .filter_map(|e| {
                    let ts = extract_timestamp_ms(e);
                    serde_json::from_value::<BookSnapshot>((*e).clone())
                        .ok()
                        .map(|book| RtEvent {
                            topic: Topic::Market,
                            kind: "book",
                            timestamp_ms: ts,
                            payload: RtPayload::Book(book),
                        })
                })
                .collect();
        }
        debug!("dropping unrecognized array frame");
        return Vec::new();
    }

    let ts = extract_timestamp_ms(value);

    // Rule 2: user trade
    if event_type_is(value, "trade") || (has(value, "status") && has(value, "maker_orders")) {
        if let Ok(trade) = serde_json::from_value::<UserTradeMsg>(value.clone()) {
            return vec![RtEvent {
                topic: Topic::User,
                kind: "trade",
                timestamp_ms: ts,
                payload: RtPayload::UserTrade(trade),
            }];
        }
    }

    // Rule 3: user order
    if event_type_is(value, "order") || (has(value, "original_size") && has(value, "size_matched"))
    {
        if let Ok(order) = serde_json::from_value::<UserOrderMsg>(value.clone()) {
            return vec![RtEvent {
                topic: Topic::User,
                kind: "order",
                timestamp_ms: ts,
                payload: RtPayload::UserOrder(order),
            }];
        }
    }

    // Rule 4: price_change fan-out, one event per entry
    if let Some(changes) = value.get("price_changes").and_then(|v| v.as_array()) {
        let market = value
            .get("market")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        return changes
            .iter()
            .filter_map(|entry| {
                serde_json::from_value::<PriceChange>(entry.clone())
                    .ok()
                    .map(|mut change| {
                        change.market = market.clone();
                        RtEvent {
                            topic: Topic::Market,
                            kind: "price_change",
                            timestamp_ms: ts,
                            payload: RtPayload::PriceChange(change),
                        }
                    })
            })
            .collect();
    }

    // Rule 5: last trade price
    if has(value, "fee_rate_bps")
        || (has(value, "price") && has(value, "side") && has(value, "size"))
    {
        if let Ok(trade) = serde_json::from_value::<LastTrade>(value.clone()) {
            return vec![RtEvent {
                topic: Topic::Market,
                kind: "last_trade_price",
                timestamp_ms: ts,
                payload: RtPayload::LastTrade(trade),
            }];
        }
    }

    // Rule 6: tick size change
    if has(value, "old_tick_size") || has(value, "new_tick_size") {
        if let Ok(change) = serde_json::from_value::<TickSizeChange>(value.clone()) {
            return vec![RtEvent {
                topic: Topic::Market,
                kind: "tick_size_change",
                timestamp_ms: ts,
                payload: RtPayload::TickSizeChange(change),
            }];
        }
    }

    // Rule 7: best bid/ask summary
    if has(value, "best_bid") && has(value, "best_ask") && has(value, "spread") {
        if let Ok(bba) = serde_json::from_value::<BestBidAsk>(value.clone()) {
            return vec![RtEvent {
                topic: Topic::Market,
                kind: "best_bid_ask",
                timestamp_ms: ts,
                payload: RtPayload::BestBidAsk(bba),
            }];
        }
    }

    // Rule 8: market resolved. Checked before new_market: resolution frames
    // are a field superset of market-creation frames.
    if has(value, "winning_asset_id") || has(value, "winning_outcome") {
        if let Ok(resolved) = serde_json::from_value::<MarketResolved>(value.clone()) {
            return vec![RtEvent {
                topic: Topic::Market,
                kind: "market_resolved",
                timestamp_ms: ts,
                payload: RtPayload::MarketResolved(resolved),
            }];
        }
    }

    // Rule 9: new market
    if has(value, "question")
        && has(value, "slug")
        && has(value, "assets_ids")
        && has(value, "outcomes")
    {
        if let Ok(market) = serde_json::from_value::<NewMarket>(value.clone()) {
            return vec![RtEvent {
                topic: Topic::Market,
                kind: "new_market",
                timestamp_ms: ts,
                payload: RtPayload::NewMarket(market),
            }];
        }
    }

    // Rule 10: single book object
    if has(value, "bids") || has(value, "asks") {
        if let Ok(book) = serde_json::from_value::<BookSnapshot>(value.clone()) {
            return vec![RtEvent {
                topic: Topic::Market,
                kind: "book",
                timestamp_ms: ts,
                payload: RtPayload::Book(book),
            }];
        }
    }

    // Rule 11: drop
    debug!("dropping unrecognized frame: {}", value);
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule1_book_array_fan_out() {
        let frame = json!([
            {
                "market": "0xabc",
                "asset_id": "111",
                "bids": [{"price": "0.48", "size": "100"}],
                "asks": [{"price": "0.52", "size": "80"}],
                "hash": "h1",
                "timestamp": "1700000000000"
            },
            {
                "market": "0xabc",
                "asset_id": "222",
                "bids": [],
                "asks": [{"price": "0.50", "size": "50"}],
                "timestamp": "1700000000000"
            }
        ]);

        let events = demux(&frame);
        assert_eq!(events.len(), 2);
        for event in &events {
            assert_eq!(event.topic, Topic::Market);
            assert_eq!(event.kind, "book");
            assert_eq!(event.timestamp_ms, 1_700_000_000_000);
        }
        match &events[0].payload {
            RtPayload::Book(book) => {
                assert_eq!(book.asset_id, "111");
                assert_eq!(book.bids.len(), 1);
            }
            other => panic!("expected book, got {:?}", other),
        }
    }

    #[test]
    fn test_rule2_user_trade_by_event_type() {
        let frame = json!({
            "event_type": "trade",
            "id": "trade-1",
            "asset_id": "111",
            "market": "0xabc",
            "side": "BUY",
            "price": "0.5",
            "size": "10",
            "status": "MATCHED",
            "taker_order_id": "order-1",
            "maker_orders": [],
            "timestamp": "1700000000"
        });

        let events = demux(&frame);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic, Topic::User);
        assert_eq!(events[0].kind, "trade");
        // Seconds get scaled to milliseconds
        assert_eq!(events[0].timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_rule2_user_trade_by_shape() {
        // No event_type; classified by status + maker_orders presence
        let frame = json!({
            "id": "trade-2",
            "asset_id": "111",
            "status": "CONFIRMED",
            "maker_orders": [
                {"order_id": "order-9", "asset_id": "111", "matched_amount": "5", "price": "0.5", "owner": "o"}
            ],
            "price": "0.5",
            "size": "5",
            "side": "SELL",
            "timestamp": 1700000000123i64
        });

        let events = demux(&frame);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "trade");
        match &events[0].payload {
            RtPayload::UserTrade(trade) => assert_eq!(trade.maker_orders.len(), 1),
            other => panic!("expected trade, got {:?}", other),
        }
    }

    #[test]
    fn test_rule3_user_order_by_shape() {
        let frame = json!({
            "id": "order-1",
            "asset_id": "111",
            "market": "0xabc",
            "side": "BUY",
            "price": "0.5",
            "original_size": "100",
            "size_matched": "40",
            "type": "UPDATE",
            "timestamp": "1700000001"
        });

        let events = demux(&frame);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic, Topic::User);
        assert_eq!(events[0].kind, "order");
        match &events[0].payload {
            RtPayload::UserOrder(order) => {
                assert_eq!(order.order_kind(), UserOrderKind::Update);
                assert_eq!(order.size_matched, "40");
            }
            other => panic!("expected order, got {:?}", other),
        }
    }

    #[test]
    fn test_rule4_price_change_fan_out_copies_market() {
        let frame = json!({
            "market": "0xabc",
            "price_changes": [
                {"asset_id": "111", "price": "0.47", "size": "30", "side": "SELL", "best_bid": "0.45", "best_ask": "0.47"},
                {"asset_id": "222", "price": "0.55", "size": "20", "side": "BUY", "best_bid": "0.55", "best_ask": "0.57"}
            ],
            "timestamp": "1700000002000"
        });

        let events = demux(&frame);
        assert_eq!(events.len(), 2);
        for event in &events {
            assert_eq!(event.kind, "price_change");
            match &event.payload {
                RtPayload::PriceChange(change) => assert_eq!(change.market, "0xabc"),
                other => panic!("expected price_change, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_rule5_last_trade_price() {
        let frame = json!({
            "asset_id": "111",
            "market": "0xabc",
            "price": "0.52",
            "side": "BUY",
            "size": "12",
            "fee_rate_bps": "0",
            "timestamp": "1700000003000"
        });

        let events = demux(&frame);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "last_trade_price");
    }

    #[test]
    fn test_rule6_tick_size_change() {
        let frame = json!({
            "asset_id": "111",
            "market": "0xabc",
            "old_tick_size": "0.01",
            "new_tick_size": "0.001",
            "timestamp": "1700000004000"
        });

        let events = demux(&frame);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "tick_size_change");
    }

    #[test]
    fn test_rule7_best_bid_ask() {
        let frame = json!({
            "asset_id": "111",
            "market": "0xabc",
            "best_bid": "0.48",
            "best_ask": "0.52",
            "spread": "0.04",
            "timestamp": "1700000005000"
        });

        let events = demux(&frame);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "best_bid_ask");
    }

    #[test]
    fn test_rule8_market_resolved_beats_new_market() {
        // Resolution frames carry the new_market fields too; the resolution
        // rule must win.
        let frame = json!({
            "market": "0xabc",
            "question": "BTC up or down?",
            "slug": "btc-up-or-down",
            "assets_ids": ["111", "222"],
            "outcomes": ["Up", "Down"],
            "winning_asset_id": "111",
            "winning_outcome": "Up",
            "timestamp": "1700000006000"
        });

        let events = demux(&frame);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "market_resolved");
        match &events[0].payload {
            RtPayload::MarketResolved(resolved) => {
                assert_eq!(resolved.winning_asset_id.as_deref(), Some("111"));
            }
            other => panic!("expected market_resolved, got {:?}", other),
        }
    }

    #[test]
    fn test_rule9_new_market() {
        let frame = json!({
            "question": "ETH up or down?",
            "slug": "eth-up-or-down",
            "assets_ids": ["333", "444"],
            "outcomes": ["Up", "Down"],
            "condition_id": "0xdef",
            "timestamp": "1700000007000"
        });

        let events = demux(&frame);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "new_market");
    }

    #[test]
    fn test_rule10_single_book_object() {
        let frame = json!({
            "market": "0xabc",
            "asset_id": "111",
            "bids": [{"price": "0.48", "size": "100"}],
            "asks": [],
            "timestamp": "1700000008000"
        });

        let events = demux(&frame);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "book");
    }

    #[test]
    fn test_rule11_unknown_dropped() {
        let frame = json!({"hello": "world"});
        assert!(demux(&frame).is_empty());
    }

    #[test]
    fn test_missing_timestamp_defaults_to_local_clock() {
        let frame = json!({
            "asset_id": "111",
            "old_tick_size": "0.01",
            "new_tick_size": "0.001"
        });

        let events = demux(&frame);
        assert_eq!(events.len(), 1);
        // Local clock fallback: must be a plausible current epoch-ms value
        assert!(events[0].timestamp_ms > 1_600_000_000_000);
    }

    #[test]
    fn test_seconds_vs_millis_normalization() {
        let seconds = json!({
            "asset_id": "111",
            "old_tick_size": "0.01",
            "new_tick_size": "0.001",
            "timestamp": "1700000000"
        });
        assert_eq!(demux(&seconds)[0].timestamp_ms, 1_700_000_000_000);

        let millis = json!({
            "asset_id": "111",
            "old_tick_size": "0.01",
            "new_tick_size": "0.001",
            "timestamp": "1700000000500"
        });
        assert_eq!(demux(&millis)[0].timestamp_ms, 1_700_000_000_500);
    }
}
