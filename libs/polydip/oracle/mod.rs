//! Underlying-asset price feed.
//!
//! A shared cache of the latest reference price per underlying, fed by a
//! WebSocket stream of `{symbol, price, timestamp}` frames. The dip-arb
//! engine snapshots `price_to_beat` from here at round start and uses the
//! live price for mispricing detection.

use crate::bus::RealtimeBus;
use crate::domain::Underlying;
use chrono::Utc;
use livesock::{ClientConfig, FrameSink, WsClient};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A single price entry with value and timestamp
#[derive(Debug, Clone, Copy)]
pub struct PricePoint {
    pub price: f64,
    pub updated_at_ms: i64,
}

/// Shared price cache accessible by the feed task and consumers
pub type SharedOraclePrices = Arc<OraclePrices>;

#[derive(Default)]
pub struct OraclePrices {
    prices: RwLock<HashMap<Underlying, PricePoint>>,
}

impl OraclePrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, underlying: Underlying, price: f64, ts_ms: i64) {
        self.prices
            .write()
            .insert(underlying, PricePoint { price, updated_at_ms: ts_ms });
    }

    pub fn get(&self, underlying: Underlying) -> Option<PricePoint> {
        self.prices.read().get(&underlying).copied()
    }

    /// Milliseconds since the last update, None if never updated
    pub fn age_ms(&self, underlying: Underlying, now_ms: i64) -> Option<i64> {
        self.get(underlying)
            .map(|p| now_ms.saturating_sub(p.updated_at_ms))
    }
}

/// Wire shape of a feed tick
#[derive(Debug, Deserialize)]
struct FeedTick {
    symbol: String,
    price: f64,
    #[serde(default)]
    timestamp: Option<i64>,
}

struct OracleSink {
    prices: SharedOraclePrices,
    bus: Option<Arc<RealtimeBus>>,
}

impl FrameSink for OracleSink {
    fn on_frame(&self, text: &str) {
        let tick: FeedTick = match serde_json::from_str(text) {
            Ok(tick) => tick,
            Err(_) => {
                debug!("unrecognized oracle frame: {}", text);
                return;
            }
        };
        let Some(underlying) = Underlying::from_str(&tick.symbol) else {
            debug!("oracle tick for untracked symbol {}", tick.symbol);
            return;
        };
        let ts_ms = tick
            .timestamp
            .map(|t| if t < 1_000_000_000_000 { t * 1000 } else { t })
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        self.prices.update(underlying, tick.price, ts_ms);
        if let Some(bus) = &self.bus {
            bus.publish_underlying_price(underlying, tick.price, ts_ms);
        }
    }
}

/// Start the oracle feed connection. The returned client lives for the
/// process; call `disconnect()` on shutdown.
pub fn spawn_oracle_feed(
    url: impl Into<String>,
    prices: SharedOraclePrices,
    bus: Option<Arc<RealtimeBus>>,
) -> Arc<WsClient> {
    let sink = Arc::new(OracleSink { prices, bus });
    let client = Arc::new(WsClient::new(ClientConfig::new(url), sink));
    client.connect();
    client
}

/// Fetch the round-open reference price (price to beat) for a market from
/// the candles endpoint. Returns the open of the candle containing
/// `start_ts_ms`.
pub async fn fetch_reference_price(
    api_base: &str,
    underlying: Underlying,
    start_ts_ms: i64,
) -> anyhow::Result<f64> {
    #[derive(Debug, Deserialize)]
    struct Candle {
        open: f64,
    }

    let url = format!(
        "{}/candles?symbol={}&ts={}",
        api_base,
        underlying.symbol(),
        start_ts_ms / 1000
    );
    let response = reqwest::get(&url).await?;
    let candles: Vec<Candle> = response.json().await?;
    match candles.first() {
        Some(candle) => Ok(candle.open),
        None => {
            warn!(%underlying, "no candle for reference price");
            anyhow::bail!("no candle returned for {}", underlying)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_and_get_price() {
        let prices = OraclePrices::new();
        prices.update(Underlying::Eth, 3456.78, 1000);

        let point = prices.get(Underlying::Eth).unwrap();
        assert!((point.price - 3456.78).abs() < 0.001);
        assert_eq!(point.updated_at_ms, 1000);
    }

    #[test]
    fn test_price_not_found() {
        let prices = OraclePrices::new();
        assert!(prices.get(Underlying::Xrp).is_none());
        assert!(prices.age_ms(Underlying::Xrp, 5000).is_none());
    }

    #[test]
    fn test_age() {
        let prices = OraclePrices::new();
        prices.update(Underlying::Btc, 100_000.0, 1_000);
        assert_eq!(prices.age_ms(Underlying::Btc, 4_500), Some(3_500));
    }

    #[test]
    fn test_separate_underlyings() {
        let prices = OraclePrices::new();
        prices.update(Underlying::Btc, 100_000.0, 1_000);
        prices.update(Underlying::Sol, 189.55, 2_000);

        assert!((prices.get(Underlying::Btc).unwrap().price - 100_000.0).abs() < 0.001);
        assert!((prices.get(Underlying::Sol).unwrap().price - 189.55).abs() < 0.001);
    }
}
