//! Orderbook entity
//!
//! Integer price representation (micros) for fast comparison, sorted Vec
//! levels with binary-search updates. Depths on this venue are small
//! (tens of levels), so a Vec beats a tree.

use serde::{Deserialize, Serialize};
use std::time::Instant;

// =============================================================================
// Price Level
// =============================================================================

/// Price level on the wire
///
/// Prices and sizes arrive as strings; parsed lazily to avoid float noise
/// in hashing/serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: String,
    pub size: String,
}

impl PriceLevel {
    pub fn new(price: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            price: price.into(),
            size: size.into(),
        }
    }

    pub fn price_f64(&self) -> f64 {
        self.price.parse().unwrap_or(0.0)
    }

    pub fn size_f64(&self) -> f64 {
        self.size.parse().unwrap_or(0.0)
    }
}

/// Convert string price (e.g., "0.75") to integer micros (750000)
#[inline]
pub fn price_to_micros(price: &str) -> u64 {
    (price.parse::<f64>().unwrap_or(0.0) * 1_000_000.0) as u64
}

/// Convert integer micros back to f64 for display and math
#[inline]
pub fn micros_to_f64(micros: u64) -> f64 {
    micros as f64 / 1_000_000.0
}

// =============================================================================
// OrderbookSide
// =============================================================================

/// A single side of the orderbook (bids or asks)
#[derive(Debug, Clone)]
pub struct OrderbookSide {
    /// Price levels as (price_micros, size_micros)
    /// Bids: sorted descending (highest first)
    /// Asks: sorted ascending (lowest first)
    levels: Vec<(u64, u64)>,
    is_bid: bool,
}

impl OrderbookSide {
    pub fn new(is_bid: bool) -> Self {
        Self {
            levels: Vec::with_capacity(64),
            is_bid,
        }
    }

    /// Replace the entire side with snapshot data
    pub fn process_snapshot(&mut self, levels: &[PriceLevel]) {
        self.levels.clear();
        self.levels.reserve(levels.len());

        for level in levels {
            let price = price_to_micros(&level.price);
            let size = price_to_micros(&level.size);
            if size > 0 {
                self.levels.push((price, size));
            }
        }

        if self.is_bid {
            self.levels.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        } else {
            self.levels.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        }
    }

    /// Update a single price level; size == 0 removes the level
    pub fn process_update(&mut self, price: u64, size: u64) {
        let search_result = self.levels.binary_search_by(|(p, _)| {
            if self.is_bid {
                p.cmp(&price).reverse()
            } else {
                p.cmp(&price)
            }
        });

        match search_result {
            Ok(idx) => {
                if size == 0 {
                    self.levels.remove(idx);
                } else {
                    self.levels[idx].1 = size;
                }
            }
            Err(idx) => {
                if size > 0 {
                    self.levels.insert(idx, (price, size));
                }
            }
        }
    }

    /// Best price level (first element)
    #[inline]
    pub fn best(&self) -> Option<(u64, u64)> {
        self.levels.first().copied()
    }

    #[inline]
    pub fn levels(&self) -> &[(u64, u64)] {
        &self.levels
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Total liquidity (sum of all sizes, micros)
    pub fn total_liquidity(&self) -> u64 {
        self.levels.iter().map(|(_, s)| s).sum()
    }
}

// =============================================================================
// Orderbook
// =============================================================================

/// Complete orderbook for one outcome token
#[derive(Debug, Clone)]
pub struct Orderbook {
    pub asset_id: String,
    pub bids: OrderbookSide,
    pub asks: OrderbookSide,
    /// Venue-reported tick size for this token, if known
    pub tick_size: Option<String>,
    /// Venue-reported minimum order size, if known
    pub min_order_size: Option<String>,
    /// Hash of the last applied snapshot
    pub hash: Option<String>,
    last_update: Instant,
}

impl Orderbook {
    pub fn new(asset_id: String) -> Self {
        Self {
            asset_id,
            bids: OrderbookSide::new(true),
            asks: OrderbookSide::new(false),
            tick_size: None,
            min_order_size: None,
            hash: None,
            last_update: Instant::now(),
        }
    }

    /// Apply a full snapshot
    pub fn process_snapshot(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.bids.process_snapshot(bids);
        self.asks.process_snapshot(asks);
        self.last_update = Instant::now();
    }

    /// Apply a single price update. `side` is "BUY" or "SELL".
    pub fn process_update(&mut self, side: &str, price: &str, size: &str) {
        let price_micros = price_to_micros(price);
        let size_micros = price_to_micros(size);

        match side.to_uppercase().as_str() {
            "BUY" => self.bids.process_update(price_micros, size_micros),
            "SELL" => self.asks.process_update(price_micros, size_micros),
            _ => {}
        }
        self.last_update = Instant::now();
    }

    /// Best bid (highest buy price)
    #[inline]
    pub fn best_bid(&self) -> Option<(u64, u64)> {
        self.bids.best()
    }

    /// Best ask (lowest sell price)
    #[inline]
    pub fn best_ask(&self) -> Option<(u64, u64)> {
        self.asks.best()
    }

    /// Best ask price as f64, if present
    pub fn best_ask_price(&self) -> Option<f64> {
        self.best_ask().map(|(p, _)| micros_to_f64(p))
    }

    /// Best bid price as f64, if present
    pub fn best_bid_price(&self) -> Option<f64> {
        self.best_bid().map(|(p, _)| micros_to_f64(p))
    }

    /// Spread in micros (best_ask - best_bid)
    pub fn spread(&self) -> Option<i64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some(ask as i64 - bid as i64),
            _ => None,
        }
    }

    /// Mid price in micros
    pub fn mid_price(&self) -> Option<u64> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some((bid + ask) / 2),
            _ => None,
        }
    }

    /// Seconds since this book last changed
    pub fn seconds_since_update(&self) -> f64 {
        self.last_update.elapsed().as_secs_f64()
    }

    /// One-line summary for logging
    pub fn format_summary(&self) -> String {
        let bid_str = self
            .best_bid()
            .map(|(p, s)| format!("{:.4} ({:.2})", micros_to_f64(p), micros_to_f64(s)))
            .unwrap_or_else(|| "N/A".to_string());

        let ask_str = self
            .best_ask()
            .map(|(p, s)| format!("{:.4} ({:.2})", micros_to_f64(p), micros_to_f64(s)))
            .unwrap_or_else(|| "N/A".to_string());

        format!("Bid: {} | Ask: {}", bid_str, ask_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_level(price: &str, size: &str) -> PriceLevel {
        PriceLevel::new(price, size)
    }

    #[test]
    fn test_price_conversion() {
        assert_eq!(price_to_micros("0.75"), 750000);
        assert_eq!(price_to_micros("1.0"), 1000000);
        assert_eq!(micros_to_f64(750000), 0.75);
    }

    #[test]
    fn test_side_snapshot_sorting() {
        let mut bids = OrderbookSide::new(true);
        bids.process_snapshot(&[
            make_level("0.70", "100"),
            make_level("0.75", "200"),
            make_level("0.72", "150"),
        ]);

        assert_eq!(bids.len(), 3);
        assert_eq!(bids.best(), Some((750000, 200000000)));

        let mut asks = OrderbookSide::new(false);
        asks.process_snapshot(&[make_level("0.80", "10"), make_level("0.77", "20")]);
        assert_eq!(asks.best(), Some((770000, 20000000)));
    }

    #[test]
    fn test_side_update_insert_and_remove() {
        let mut bids = OrderbookSide::new(true);
        bids.process_snapshot(&[make_level("0.75", "200"), make_level("0.74", "150")]);

        bids.process_update(750000, 300000000);
        assert_eq!(bids.best(), Some((750000, 300000000)));

        bids.process_update(760000, 100000000);
        assert_eq!(bids.best(), Some((760000, 100000000)));

        bids.process_update(760000, 0);
        assert_eq!(bids.best(), Some((750000, 300000000)));
    }

    #[test]
    fn test_orderbook_spread_and_mid() {
        let mut ob = Orderbook::new("test".to_string());
        ob.process_snapshot(
            &[make_level("0.74", "100"), make_level("0.73", "200")],
            &[make_level("0.76", "100"), make_level("0.77", "200")],
        );

        assert_eq!(ob.best_bid(), Some((740000, 100000000)));
        assert_eq!(ob.best_ask(), Some((760000, 100000000)));
        assert_eq!(ob.spread(), Some(20000));
        assert_eq!(ob.mid_price(), Some(750000));
    }

    #[test]
    fn test_orderbook_update_routing() {
        let mut ob = Orderbook::new("test".to_string());
        ob.process_snapshot(&[make_level("0.74", "100")], &[make_level("0.76", "100")]);

        ob.process_update("BUY", "0.75", "200");
        assert_eq!(ob.best_bid(), Some((750000, 200000000)));

        ob.process_update("SELL", "0.755", "150");
        assert_eq!(ob.best_ask(), Some((755000, 150000000)));
    }
}
