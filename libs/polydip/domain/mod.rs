//! Domain entities shared across the engine.

pub mod orderbook;
pub mod types;

pub use orderbook::{micros_to_f64, price_to_micros, Orderbook, OrderbookSide, PriceLevel};
pub use types::{
    MarketDescriptor, MarketDuration, OrderKind, OrderStatus, OutcomeSide, Side, TradeStatus,
    Underlying,
};
